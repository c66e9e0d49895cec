//! Snapshot serialization.
//!
//! A snapshot is a single file holding every node of a tree. Nodes are
//! numbered breadth-first from the root (the root is id 0), and all links
//! between nodes are written as those ids.
//!
//! # File Format
//!
//! All integers are little-endian.
//!
//! - Header: magic (8 bytes), format version (u32), order (u32),
//!   height (u32), root id (u32), node count (u32)
//! - One record per node, in id order:
//!   - node type (u8): 0 = internal, 1 = leaf
//!   - key count (u32), then each key as u32 length + bytes
//!   - leaf: each value as presence byte (1) + u32 length + bytes,
//!     then the next leaf id (u32)
//!   - internal: key count + 1 child ids (u32 each)
//!   - parent id (u32)
//! - Trailer: CRC32 of everything before it (u32)
//!
//! `NO_NODE` marks an absent link. It is never a valid id, so the root
//! (id 0) and "no link" can't be confused.
//!
//! # Loading
//!
//! Loading decodes every record before linking anything, then builds one
//! arena slot per id. Because arena handles are assigned in slot order, a
//! snapshot id is also the node's handle in the loaded tree. The linked tree
//! must then pass `check_invariants`, so a file whose checksum is valid but
//! whose links do not form a balanced tree is rejected as corrupt.

// Snapshot ids and lengths are bounded by u32 when written.
#![allow(clippy::cast_possible_truncation)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::btree::{BPlusTree, InternalNode, LeafNode, Node, NodeArena, NodeId, NodeType};
use crate::codec::{CodecError, NodeCodec};

/// Magic number identifying a snapshot file.
pub const MAGIC: [u8; 8] = *b"BPTSNAP\0";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Link value meaning "no node".
pub const NO_NODE: u32 = u32::MAX;

/// Header size: magic + five u32 fields.
pub const HEADER_SIZE: usize = 8 + 5 * 4;

/// Trailer size: the CRC32 checksum.
const TRAILER_SIZE: usize = 4;

/// Presence marker written before every value.
const VALUE_PRESENT: u8 = 1;

/// Offset of the node count within the header.
const NODE_COUNT_OFFSET: usize = HEADER_SIZE - 4;

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + NodeCodec,
    V: Clone + NodeCodec,
{
    /// Write the tree to `path`.
    ///
    /// The snapshot is written to a uniquely named sibling temporary file,
    /// synced, and then renamed over `path`, so an existing snapshot is
    /// replaced atomically. Saves of one tree run one at a time.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let _saving = self.save_lock.lock();
        let bytes = self.to_snapshot_bytes();
        write_atomically(path, &bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "saved snapshot");
        Ok(())
    }

    /// Read a tree previously written by [`BPlusTree::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SnapshotError::Io {
            step: IoStep::Read,
            path: path.to_path_buf(),
            source,
        })?;
        let tree = Self::from_snapshot_bytes(&bytes)?;
        tracing::debug!(
            path = %path.display(),
            nodes = tree.node_count(),
            height = tree.height(),
            "loaded snapshot"
        );
        Ok(tree)
    }

    /// Encode the tree as snapshot bytes.
    ///
    /// Holds the tree-wide lock exclusively for the whole pass, so no split
    /// can change the shape being written.
    #[must_use]
    pub fn to_snapshot_bytes(&self) -> Vec<u8> {
        let meta = self.meta.write();

        let mut buf = Vec::with_capacity(HEADER_SIZE + 64 * self.arena.len());
        buf.extend_from_slice(&MAGIC);
        put_u32(&mut buf, FORMAT_VERSION);
        put_u32(&mut buf, self.order as u32);
        put_u32(&mut buf, meta.height as u32);
        put_u32(&mut buf, 0); // root id
        put_u32(&mut buf, 0); // node count, patched below

        let mut ids: HashMap<NodeId, u32> = HashMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        ids.insert(meta.root, 0);
        queue.push_back(meta.root);

        let mut enumerate = |node: NodeId, queue: &mut VecDeque<NodeId>| -> u32 {
            let next_id = ids.len() as u32;
            *ids.entry(node).or_insert_with(|| {
                queue.push_back(node);
                next_id
            })
        };

        let mut scratch = Vec::new();
        while let Some(node_id) = queue.pop_front() {
            let guard = self.arena.read(node_id);
            buf.push(guard.node_type() as u8);
            put_u32(&mut buf, guard.key_count() as u32);
            for key in guard.keys() {
                scratch.clear();
                key.encode(&mut scratch);
                put_bytes(&mut buf, &scratch);
            }

            match &*guard {
                Node::Leaf(leaf) => {
                    for value in &leaf.values {
                        scratch.clear();
                        value.encode(&mut scratch);
                        buf.push(VALUE_PRESENT);
                        put_bytes(&mut buf, &scratch);
                    }
                    let next = leaf
                        .next
                        .map_or(NO_NODE, |next| enumerate(next, &mut queue));
                    put_u32(&mut buf, next);
                }
                Node::Internal(node) => {
                    for &child in &node.children {
                        let child_id = enumerate(child, &mut queue);
                        put_u32(&mut buf, child_id);
                    }
                }
            }
            drop(guard);

            let parent = self
                .arena
                .parent(node_id)
                .map_or(NO_NODE, |parent| enumerate(parent, &mut queue));
            put_u32(&mut buf, parent);
        }

        let node_count = ids.len() as u32;
        buf[NODE_COUNT_OFFSET..HEADER_SIZE].copy_from_slice(&node_count.to_le_bytes());
        drop(meta);

        let checksum = crc32fast::hash(&buf);
        put_u32(&mut buf, checksum);
        buf
    }

    /// Decode a tree from snapshot bytes.
    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(SnapshotError::Truncated("header"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_SIZE);

        let mut reader = SnapshotReader::new(body);
        if reader.read_bytes(MAGIC.len(), "magic")? != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = reader.read_u32("format version")?;
        if version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(SnapshotError::ChecksumMismatch { expected, actual });
        }

        let order = reader.read_u32("order")? as usize;
        let height = reader.read_u32("height")? as usize;
        let root_id = reader.read_u32("root id")?;
        let node_count = reader.read_u32("node count")?;

        if node_count == 0 {
            return Ok(Self::new(order));
        }
        if height == 0 {
            return Err(SnapshotError::Corrupt("non-empty tree with height 0".into()));
        }

        // First pass: decode records without resolving any links.
        let mut records = Vec::with_capacity(reader.bounded_capacity(node_count, 13));
        for _ in 0..node_count {
            records.push(RawNode::<K, V>::read(&mut reader)?);
        }
        if reader.remaining() != 0 {
            return Err(SnapshotError::Corrupt(format!(
                "{} trailing bytes after {node_count} nodes",
                reader.remaining()
            )));
        }

        // Second pass: turn ids into handles.
        let resolve = |id: u32, what: &str| -> Result<Option<NodeId>, SnapshotError> {
            if id == NO_NODE {
                Ok(None)
            } else if id < node_count {
                Ok(Some(id))
            } else {
                Err(SnapshotError::Corrupt(format!(
                    "{what} id {id} out of range (node count {node_count})"
                )))
            }
        };

        let mut nodes = Vec::with_capacity(records.len());
        for record in records {
            let parent = resolve(record.parent, "parent")?;
            let node = match record.links {
                RawLinks::Leaf { values, next } => Node::Leaf(LeafNode {
                    keys: record.keys,
                    values,
                    next: resolve(next, "next")?,
                }),
                RawLinks::Internal { children } => {
                    let children = children
                        .into_iter()
                        .map(|child| {
                            resolve(child, "child")?.ok_or_else(|| {
                                SnapshotError::Corrupt("internal node with missing child".into())
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Node::Internal(InternalNode {
                        keys: record.keys,
                        children,
                    })
                }
            };
            nodes.push((node, parent));
        }

        let root = resolve(root_id, "root")?
            .ok_or_else(|| SnapshotError::Corrupt("non-empty tree without a root".into()))?;

        let tree = Self::from_parts(NodeArena::from_nodes(nodes), root, height, order);

        // The checksum only proves the bytes are intact. The links must also
        // form a tree before any descent may follow them.
        tree.check_invariants()
            .map_err(|violation| SnapshotError::Corrupt(violation.to_string()))?;
        Ok(tree)
    }
}

/// A node record with its links still expressed as snapshot ids.
struct RawNode<K, V> {
    keys: Vec<K>,
    links: RawLinks<V>,
    parent: u32,
}

enum RawLinks<V> {
    Leaf { values: Vec<V>, next: u32 },
    Internal { children: Vec<u32> },
}

impl<K: NodeCodec, V: NodeCodec> RawNode<K, V> {
    fn read(reader: &mut SnapshotReader<'_>) -> Result<Self, SnapshotError> {
        let type_byte = reader.read_u8("node type")?;
        let node_type = NodeType::try_from(type_byte)
            .map_err(|b| SnapshotError::Corrupt(format!("unknown node type {b}")))?;

        let key_count = reader.read_u32("key count")?;
        let mut keys = Vec::with_capacity(reader.bounded_capacity(key_count, 4));
        for _ in 0..key_count {
            let len = reader.read_u32("key length")? as usize;
            keys.push(K::decode(reader.read_bytes(len, "key")?)?);
        }

        let links = match node_type {
            NodeType::Leaf => {
                let mut values = Vec::with_capacity(keys.len());
                for _ in 0..key_count {
                    let presence = reader.read_u8("value presence")?;
                    if presence != VALUE_PRESENT {
                        return Err(SnapshotError::Corrupt(format!(
                            "invalid value presence marker {presence}"
                        )));
                    }
                    let len = reader.read_u32("value length")? as usize;
                    values.push(V::decode(reader.read_bytes(len, "value")?)?);
                }
                let next = reader.read_u32("next id")?;
                RawLinks::Leaf { values, next }
            }
            NodeType::Internal => {
                let mut children = Vec::with_capacity(keys.len() + 1);
                for _ in 0..=key_count {
                    children.push(reader.read_u32("child id")?);
                }
                RawLinks::Internal { children }
            }
        };

        let parent = reader.read_u32("parent id")?;
        Ok(Self {
            keys,
            links,
            parent,
        })
    }
}

/// Cursor over snapshot bytes that fails on any short read.
struct SnapshotReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Capacity to reserve for `count` items of at least `min_size` bytes,
    /// capped by what the remaining input could possibly hold.
    fn bounded_capacity(&self, count: u32, min_size: usize) -> usize {
        (count as usize).min(self.remaining() / min_size)
    }

    fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], SnapshotError> {
        if len > self.remaining() {
            return Err(SnapshotError::Truncated(context));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, SnapshotError> {
        Ok(self.read_bytes(1, context)?[0])
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, SnapshotError> {
        let b = self.read_bytes(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

/// Write `bytes` to `path` through a synced temporary file.
///
/// The temporary file has a unique name in the target's directory, so
/// concurrent saves to one path never write the same file, and the final
/// rename stays on one filesystem.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let io_error = |step: IoStep, target: &Path| {
        let target = target.to_path_buf();
        move |source: std::io::Error| SnapshotError::Io {
            step,
            path: target,
            source,
        }
    };

    let mut file = NamedTempFile::new_in(dir).map_err(io_error(IoStep::Create, dir))?;
    file.write_all(bytes)
        .map_err(io_error(IoStep::Write, file.path()))?;
    file.as_file()
        .sync_all()
        .map_err(io_error(IoStep::Sync, file.path()))?;

    file.persist(path)
        .map(drop)
        .map_err(|e| io_error(IoStep::Rename, path)(e.error))
}

/// The file operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStep {
    Create,
    Write,
    Sync,
    Rename,
    Read,
}

impl std::fmt::Display for IoStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Sync => "sync",
            Self::Rename => "rename",
            Self::Read => "read",
        };
        f.write_str(step)
    }
}

/// Errors that can occur while saving or loading a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// A file operation failed.
    Io {
        step: IoStep,
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file does not start with the snapshot magic number.
    BadMagic,
    /// The file was written by an unknown format version.
    UnsupportedVersion(u32),
    /// The stored checksum does not match the contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The file ended while reading the named field.
    Truncated(&'static str),
    /// The contents are structurally invalid.
    Corrupt(String),
    /// A key or value could not be decoded.
    Codec(CodecError),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { step, path, source } => {
                write!(f, "failed to {step} {}: {source}", path.display())
            }
            Self::BadMagic => write!(f, "not a snapshot file (bad magic number)"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported snapshot version {v}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "snapshot checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
            ),
            Self::Truncated(context) => write!(f, "snapshot truncated while reading {context}"),
            Self::Corrupt(msg) => write!(f, "corrupt snapshot: {msg}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for SnapshotError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_tree() -> BPlusTree<Vec<u8>, u64> {
        let tree = BPlusTree::new(3);
        for i in 0..40u64 {
            tree.insert(format!("key{i:02}").into_bytes(), i * 7);
        }
        tree
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("tree.snapshot");

        let tree = sample_tree();
        tree.save(&path).expect("save");

        let loaded: BPlusTree<Vec<u8>, u64> = BPlusTree::load(&path).expect("load");
        assert_eq!(loaded.order(), tree.order());
        assert_eq!(loaded.height(), tree.height());
        assert_eq!(loaded.node_count(), tree.node_count());
        for i in 0..40u64 {
            let key = format!("key{i:02}").into_bytes();
            assert_eq!(loaded.search(&key), Some(i * 7), "mismatch at {i}");
        }
        assert_eq!(loaded.range(..), tree.range(..));
        loaded.check_invariants().expect("loaded tree is well formed");
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("tree.snapshot");

        let tree = sample_tree();
        tree.save(&path).expect("first save");
        tree.insert(b"zzz".to_vec(), 1);
        tree.delete(&b"key00".to_vec());
        tree.save(&path).expect("second save");

        let loaded: BPlusTree<Vec<u8>, u64> = BPlusTree::load(&path).expect("load");
        assert_eq!(loaded.search(&b"zzz".to_vec()), Some(1));
        assert_eq!(loaded.search(&b"key00".to_vec()), None);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("list dir")
            .map(|entry| entry.expect("dir entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("tree.snapshot")]);
    }

    #[test]
    fn test_concurrent_saves_to_one_path() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("shared.snapshot");
        let trees: Vec<BPlusTree<u32, u32>> = (0..4u32)
            .map(|t| {
                let tree = BPlusTree::new(3);
                for i in 0..(50 + t * 25) {
                    tree.insert(i, t);
                }
                tree
            })
            .collect();

        std::thread::scope(|s| {
            for tree in &trees {
                let path = &path;
                s.spawn(move || {
                    for _ in 0..25 {
                        tree.save(path).expect("save");
                    }
                });
            }
        });

        // The survivor is one complete snapshot, not a mix of writers
        let loaded: BPlusTree<u32, u32> = BPlusTree::load(&path).expect("load");
        let owner = loaded.search(&0).expect("key 0 present");
        let expected_len = 50 + owner as usize * 25;
        assert_eq!(loaded.len(), expected_len);
        assert!(loaded.range(..).iter().all(|&(_, v)| v == owner));
        assert_eq!(std::fs::read_dir(dir.path()).expect("list dir").count(), 1);
    }

    #[test]
    fn test_header_layout() {
        let tree: BPlusTree<Vec<u8>, u64> = BPlusTree::new(5);
        tree.insert(b"a".to_vec(), 1);
        let bytes = tree.to_snapshot_bytes();

        assert_eq!(&bytes[..8], &MAGIC);
        let field = |i: usize| {
            let at = 8 + i * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        assert_eq!(field(0), FORMAT_VERSION);
        assert_eq!(field(1), 5); // order
        assert_eq!(field(2), 1); // height
        assert_eq!(field(3), 0); // root id
        assert_eq!(field(4), 1); // node count

        // Single leaf: type, key count, key, value, next, parent
        let record = &bytes[HEADER_SIZE..bytes.len() - TRAILER_SIZE];
        let mut expected = vec![1u8];
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'a');
        expected.push(VALUE_PRESENT);
        expected.extend_from_slice(&8u32.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&NO_NODE.to_le_bytes());
        expected.extend_from_slice(&NO_NODE.to_le_bytes());
        assert_eq!(record, expected.as_slice());
    }

    #[test]
    fn test_breadth_first_ids() {
        let tree: BPlusTree<u32, u32> = BPlusTree::new(3);
        for i in 0..4 {
            tree.insert(i, i);
        }
        // Root [2] over leaves [0,1] and [2,3]
        let bytes = tree.to_snapshot_bytes();
        let mut reader = SnapshotReader::new(&bytes[HEADER_SIZE..bytes.len() - TRAILER_SIZE]);

        let root = RawNode::<u32, u32>::read(&mut reader).expect("root");
        let RawLinks::Internal { children } = root.links else {
            panic!("root should be internal");
        };
        assert_eq!(children, vec![1, 2]);
        assert_eq!(root.parent, NO_NODE);

        let left = RawNode::<u32, u32>::read(&mut reader).expect("left leaf");
        let RawLinks::Leaf { next, .. } = left.links else {
            panic!("left child should be a leaf");
        };
        assert_eq!(left.keys, vec![0, 1]);
        assert_eq!(next, 2);
        assert_eq!(left.parent, 0);

        let right = RawNode::<u32, u32>::read(&mut reader).expect("right leaf");
        let RawLinks::Leaf { next, .. } = right.links else {
            panic!("right child should be a leaf");
        };
        assert_eq!(right.keys, vec![2, 3]);
        assert_eq!(next, NO_NODE);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_empty_tree_round_trip() {
        let tree: BPlusTree<Vec<u8>, u64> = BPlusTree::new(7);
        let loaded: BPlusTree<Vec<u8>, u64> =
            BPlusTree::from_snapshot_bytes(&tree.to_snapshot_bytes()).expect("decode");
        assert_eq!(loaded.order(), 7);
        assert_eq!(loaded.height(), 1);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_zero_node_snapshot_builds_fresh_tree() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        for field in [FORMAT_VERSION, 6, 0, NO_NODE, 0] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        let tree: BPlusTree<Vec<u8>, u64> =
            BPlusTree::from_snapshot_bytes(&bytes).expect("decode");
        assert_eq!(tree.order(), 6);
        assert_eq!(tree.height(), 1);
        assert!(tree.is_empty());
        tree.insert(b"k".to_vec(), 1);
        assert_eq!(tree.search(&b"k".to_vec()), Some(1));
    }

    #[test]
    fn test_empty_value_is_not_absent() {
        let tree: BPlusTree<Vec<u8>, Vec<u8>> = BPlusTree::new(4);
        tree.insert(b"empty".to_vec(), Vec::new());
        let loaded: BPlusTree<Vec<u8>, Vec<u8>> =
            BPlusTree::from_snapshot_bytes(&tree.to_snapshot_bytes()).expect("decode");
        assert_eq!(loaded.search(&b"empty".to_vec()), Some(Vec::new()));
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let bytes = sample_tree().to_snapshot_bytes();
        let result = BPlusTree::<Vec<u8>, u64>::from_snapshot_bytes(&bytes[..HEADER_SIZE / 2]);
        assert!(matches!(result, Err(SnapshotError::Truncated("header"))));

        // Cutting the body also breaks the checksum
        let cut = &bytes[..bytes.len() - 10];
        assert!(BPlusTree::<Vec<u8>, u64>::from_snapshot_bytes(cut).is_err());
    }

    #[test]
    fn test_corrupted_byte_rejected() {
        let mut bytes = sample_tree().to_snapshot_bytes();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;

        let result = BPlusTree::<Vec<u8>, u64>::from_snapshot_bytes(&bytes);
        assert!(matches!(
            result,
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_tree().to_snapshot_bytes();
        bytes[0] = b'X';
        let result = BPlusTree::<Vec<u8>, u64>::from_snapshot_bytes(&bytes);
        assert!(matches!(result, Err(SnapshotError::BadMagic)));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = sample_tree().to_snapshot_bytes();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        let result = BPlusTree::<Vec<u8>, u64>::from_snapshot_bytes(&bytes);
        assert!(matches!(result, Err(SnapshotError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_value_width_mismatch_rejected() {
        // Values saved as strings cannot be read back as fixed-width integers
        let tree: BPlusTree<Vec<u8>, String> = BPlusTree::new(4);
        tree.insert(b"k".to_vec(), "abc".to_string());
        let result = BPlusTree::<Vec<u8>, u64>::from_snapshot_bytes(&tree.to_snapshot_bytes());
        assert!(matches!(
            result,
            Err(SnapshotError::Codec(CodecError::WrongLength {
                expected: 8,
                actual: 3
            }))
        ));
    }

    #[test]
    fn test_out_of_range_link_rejected() {
        let tree: BPlusTree<u32, u32> = BPlusTree::new(4);
        tree.insert(1, 1);
        let mut bytes = tree.to_snapshot_bytes();

        // Point the single leaf's next link past the end, then re-seal
        let body_len = bytes.len() - TRAILER_SIZE;
        let next_at = body_len - 8;
        bytes[next_at..next_at + 4].copy_from_slice(&5u32.to_le_bytes());
        let checksum = crc32fast::hash(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());

        let result = BPlusTree::<u32, u32>::from_snapshot_bytes(&bytes);
        assert!(matches!(result, Err(SnapshotError::Corrupt(_))));
    }

    fn internal_record(keys: &[u32], children: &[u32], parent: u32) -> Vec<u8> {
        let mut out = vec![NodeType::Internal as u8];
        put_u32(&mut out, keys.len() as u32);
        for key in keys {
            put_bytes(&mut out, &key.to_le_bytes());
        }
        for &child in children {
            put_u32(&mut out, child);
        }
        put_u32(&mut out, parent);
        out
    }

    fn leaf_record(keys: &[u32], next: u32, parent: u32) -> Vec<u8> {
        let mut out = vec![NodeType::Leaf as u8];
        put_u32(&mut out, keys.len() as u32);
        for key in keys {
            put_bytes(&mut out, &key.to_le_bytes());
        }
        for key in keys {
            out.push(VALUE_PRESENT);
            put_bytes(&mut out, &key.to_le_bytes());
        }
        put_u32(&mut out, next);
        put_u32(&mut out, parent);
        out
    }

    /// Header + records + a valid checksum.
    fn sealed(height: u32, records: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        for field in [FORMAT_VERSION, 4, height, 0, records.len() as u32] {
            put_u32(&mut bytes, field);
        }
        for record in records {
            bytes.extend_from_slice(record);
        }
        let checksum = crc32fast::hash(&bytes);
        put_u32(&mut bytes, checksum);
        bytes
    }

    fn assert_corrupt(bytes: &[u8], needle: &str) {
        match BPlusTree::<u32, u32>::from_snapshot_bytes(bytes) {
            Err(SnapshotError::Corrupt(msg)) => {
                assert!(msg.contains(needle), "unexpected message: {msg}");
            }
            Err(other) => panic!("expected corruption, got {other}"),
            Ok(_) => panic!("malformed snapshot was accepted"),
        }
    }

    #[test]
    fn test_well_formed_handmade_snapshot_loads() {
        let bytes = sealed(
            2,
            &[
                internal_record(&[5], &[1, 2], NO_NODE),
                leaf_record(&[1, 2], 2, 0),
                leaf_record(&[5, 9], NO_NODE, 0),
            ],
        );
        let tree = BPlusTree::<u32, u32>::from_snapshot_bytes(&bytes).expect("decode");
        assert_eq!(tree.search(&9), Some(9));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_self_cycle_rejected() {
        // A root that lists itself as a child would trap every descent
        let bytes = sealed(
            2,
            &[
                internal_record(&[5], &[0, 1], NO_NODE),
                leaf_record(&[7], NO_NODE, 0),
            ],
        );
        assert_corrupt(&bytes, "parent handle");

        let single = sealed(2, &[internal_record(&[5], &[0, 0], NO_NODE)]);
        assert_corrupt(&single, "height 2 impossible");
    }

    #[test]
    fn test_shared_child_rejected() {
        let bytes = sealed(
            2,
            &[
                internal_record(&[5], &[1, 1], NO_NODE),
                leaf_record(&[1], NO_NODE, 0),
            ],
        );
        assert_corrupt(&bytes, "more than once");
    }

    #[test]
    fn test_wrong_height_rejected() {
        let tree: BPlusTree<u32, u32> = BPlusTree::new(3);
        for i in 0..4 {
            tree.insert(i, i);
        }
        let mut bytes = tree.to_snapshot_bytes();
        let body_len = bytes.len() - TRAILER_SIZE;
        bytes[16..20].copy_from_slice(&3u32.to_le_bytes());
        let checksum = crc32fast::hash(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());

        assert_corrupt(&bytes, "depth");
    }

    #[test]
    fn test_huge_height_rejected() {
        let bytes = sealed(u32::MAX - 1, &[leaf_record(&[1], NO_NODE, NO_NODE)]);
        assert_corrupt(&bytes, "height");
    }

    #[test]
    fn test_leaf_as_internal_child_rejected() {
        // Height 3 needs internal nodes on level 2, but both children are leaves
        let bytes = sealed(
            3,
            &[
                internal_record(&[5], &[1, 2], NO_NODE),
                leaf_record(&[1], 2, 0),
                leaf_record(&[7], NO_NODE, 0),
            ],
        );
        assert_corrupt(&bytes, "leaf at depth 2");
    }

    #[test]
    fn test_leaf_chain_cycle_rejected() {
        let bytes = sealed(
            2,
            &[
                internal_record(&[5], &[1, 2], NO_NODE),
                leaf_record(&[1], 2, 0),
                leaf_record(&[7], 1, 0),
            ],
        );
        assert_corrupt(&bytes, "next is");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("absent.snapshot");
        let err = BPlusTree::<Vec<u8>, u64>::load(&path).expect_err("missing file");
        assert!(matches!(
            err,
            SnapshotError::Io {
                step: IoStep::Read,
                ..
            }
        ));
        assert!(err.to_string().starts_with("failed to read"));
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("no-such-dir").join("tree.snapshot");
        let err = sample_tree().save(&path).expect_err("save should fail");
        assert!(matches!(
            err,
            SnapshotError::Io {
                step: IoStep::Create,
                ..
            }
        ));
    }
}
