//! Concurrent B+Tree.
//!
//! The tree keeps its nodes in a `NodeArena` and coordinates concurrent
//! callers with two lock granularities:
//! - a tree-wide lock guarding `root` and `height`, taken shared to enter a
//!   descent and exclusively for splits and snapshots
//! - one latch per node, taken shared while passing through a node and
//!   exclusively while changing it
//!
//! Every descent is latch-coupled: the child's latch is acquired before the
//! parent's is released. Inserts first try the leaf alone. When the leaf would
//! overflow, the insert takes the tree-wide lock exclusively and re-descends
//! with exclusive latches, keeping latched only the ancestors that the split
//! can reach. Latches are therefore always taken top-down (and left to right
//! along the leaf chain), so there is no lock cycle.
//!
//! Deletes never rebalance. A leaf may end up underfull or empty.

use std::ops::{Bound, RangeBounds};

use parking_lot::{Mutex, RwLock};

use crate::btree::arena::{NodeArena, NodeReadGuard, NodeWriteGuard};
use crate::btree::node::{InternalNode, LeafNode, Node, NodeId};
use crate::checkpoint::CheckpointSlot;

/// Order used when the requested order is too small.
pub const DEFAULT_ORDER: usize = 4;

/// Smallest order the tree accepts.
pub const MIN_ORDER: usize = 3;

/// Root handle and height, guarded by the tree-wide lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeMeta {
    pub root: NodeId,
    pub height: usize,
}

/// A thread-safe ordered map backed by a B+Tree.
pub struct BPlusTree<K, V> {
    pub(crate) arena: NodeArena<K, V>,
    pub(crate) meta: RwLock<TreeMeta>,
    pub(crate) order: usize,
    pub(crate) checkpoint: CheckpointSlot,
    /// Serializes whole saves, so the last save to finish wrote the newest state.
    pub(crate) save_lock: Mutex<()>,
}

/// Coerce a requested order to one the tree can split with.
#[must_use]
pub const fn effective_order(order: usize) -> usize {
    if order < MIN_ORDER {
        DEFAULT_ORDER
    } else {
        order
    }
}

impl<K: Ord + Clone, V: Clone> BPlusTree<K, V> {
    /// Create an empty tree whose nodes hold at most `order` keys.
    ///
    /// Orders below `MIN_ORDER` are replaced by `DEFAULT_ORDER`.
    #[must_use]
    pub fn new(order: usize) -> Self {
        let arena = NodeArena::new();
        let root = arena.alloc(Node::Leaf(LeafNode::new()), None);
        Self::from_parts(arena, root, 1, order)
    }

    /// Assemble a tree from an already linked arena.
    pub(crate) fn from_parts(
        arena: NodeArena<K, V>,
        root: NodeId,
        height: usize,
        order: usize,
    ) -> Self {
        Self {
            arena,
            meta: RwLock::new(TreeMeta { root, height }),
            order: effective_order(order),
            checkpoint: CheckpointSlot::default(),
            save_lock: Mutex::new(()),
        }
    }

    /// Maximum number of keys per node.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Number of levels, 1 when the root is a leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        self.meta.read().height
    }

    /// Number of allocated nodes, including underfull ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Look up a value by key.
    #[must_use]
    pub fn search(&self, key: &K) -> Option<V> {
        let guard = self.descend_shared(|node| node.child_for(key));
        match &*guard {
            Node::Leaf(leaf) => leaf.get(key).cloned(),
            Node::Internal(_) => None,
        }
    }

    /// Alias of [`BPlusTree::search`].
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.search(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.search(key).is_some()
    }

    /// Insert or update a key-value pair.
    ///
    /// Returns the old value if updating, None if inserting.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.descend_exclusive(&key);
        if let Node::Leaf(leaf) = &mut *guard {
            if leaf.can_absorb(&key, self.order) {
                return leaf.insert(key, value);
            }
        }
        drop(guard);

        self.insert_with_split(key, value)
    }

    /// Remove a key, returning its value if it was present.
    ///
    /// Underfull leaves are left as they are.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.descend_exclusive(key);
        match &mut *guard {
            Node::Leaf(leaf) => leaf.remove(key),
            Node::Internal(_) => None,
        }
    }

    /// Remove a key, returning whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.remove(key).is_some()
    }

    /// All entries whose keys fall in `bounds`, in ascending key order.
    ///
    /// Leaves are visited along the `next` chain. Each leaf is read
    /// consistently, but the result is not a snapshot of the whole tree when
    /// writers run concurrently.
    #[must_use]
    pub fn range<R: RangeBounds<K>>(&self, bounds: R) -> Vec<(K, V)> {
        let mut guard = match bounds.start_bound() {
            Bound::Included(start) | Bound::Excluded(start) => {
                self.descend_shared(|node| node.child_for(start))
            }
            Bound::Unbounded => self.descend_shared(Node::first_child),
        };

        let mut entries = Vec::new();
        loop {
            let Node::Leaf(leaf) = &*guard else {
                return entries;
            };
            for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                let past_end = match bounds.end_bound() {
                    Bound::Included(end) => key > end,
                    Bound::Excluded(end) => key >= end,
                    Bound::Unbounded => false,
                };
                if past_end {
                    return entries;
                }
                if bounds.contains(key) {
                    entries.push((key.clone(), value.clone()));
                }
            }
            let Some(next) = leaf.next else {
                return entries;
            };
            let next_guard = self.arena.read(next);
            guard = next_guard;
        }
    }

    /// Number of entries, counted along the leaf chain.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut guard = self.descend_shared(Node::first_child);
        let mut count = 0;
        loop {
            let Node::Leaf(leaf) = &*guard else {
                return count;
            };
            count += leaf.len();
            let Some(next) = leaf.next else {
                return count;
            };
            let next_guard = self.arena.read(next);
            guard = next_guard;
        }
    }

    /// Whether the tree holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk from the root to a leaf with shared latches.
    ///
    /// `choose` picks the child of an internal node and returns `None` at a
    /// leaf. The returned guard is the leaf's.
    fn descend_shared<F>(&self, choose: F) -> NodeReadGuard<K, V>
    where
        F: Fn(&Node<K, V>) -> Option<NodeId>,
    {
        let meta = self.meta.read();
        let mut guard = self.arena.read(meta.root);
        drop(meta);

        loop {
            let Some(child) = choose(&*guard) else {
                return guard;
            };
            // Latch the child before the parent's latch is released
            let child_guard = self.arena.read(child);
            guard = child_guard;
        }
    }

    /// Walk to the leaf responsible for `key` and latch it exclusively.
    ///
    /// Internal nodes are latched shared. The leaf's parent stays latched
    /// until the leaf's exclusive latch is held, so the leaf cannot be split
    /// away from `key` in between.
    fn descend_exclusive(&self, key: &K) -> NodeWriteGuard<K, V> {
        let meta = self.meta.read();
        let root = meta.root;
        let root_guard = self.arena.read(root);
        let Some(mut child) = root_guard.child_for(key) else {
            // A leaf root cannot split while the tree lock is held shared
            drop(root_guard);
            return self.arena.write(root);
        };
        drop(meta);

        let mut parent = root_guard;
        loop {
            let shared = self.arena.read(child);
            if let Some(grandchild) = shared.child_for(key) {
                parent = shared;
                child = grandchild;
                continue;
            }
            drop(shared);
            let leaf = self.arena.write(child);
            drop(parent);
            return leaf;
        }
    }

    /// Insert a key whose leaf is full, splitting as far up as needed.
    fn insert_with_split(&self, key: K, value: V) -> Option<V> {
        let mut meta = self.meta.write();

        // Exclusively latched internal nodes that the split may still reach,
        // outermost first. A node that can take one more separator without
        // overflowing shields everything above it, so those latches are dropped.
        let mut ancestors: Vec<(NodeId, NodeWriteGuard<K, V>)> = Vec::new();
        let mut id = meta.root;

        loop {
            let mut guard = self.arena.write(id);
            match &mut *guard {
                Node::Internal(node) => {
                    let child = node.child_for(&key);
                    if node.keys.len() < self.order {
                        ancestors.clear();
                    }
                    ancestors.push((id, guard));
                    id = child;
                }
                Node::Leaf(leaf) => {
                    let old = leaf.insert(key, value);
                    if leaf.len() <= self.order {
                        // Another writer made room while we waited
                        return old;
                    }

                    let (separator, right) = leaf.split();
                    let right_id = self.arena.alloc(Node::Leaf(right), None);
                    leaf.next = Some(right_id);
                    tracing::debug!(leaf = id, right = right_id, "split leaf");

                    self.promote(&mut meta, ancestors, id, separator, right_id);
                    return old;
                }
            }
        }
    }

    /// Insert `separator` and `right_id` next to `left_id` in its parent,
    /// splitting ancestors that overflow and growing a new root if needed.
    fn promote(
        &self,
        meta: &mut TreeMeta,
        mut ancestors: Vec<(NodeId, NodeWriteGuard<K, V>)>,
        mut left_id: NodeId,
        mut separator: K,
        mut right_id: NodeId,
    ) {
        while let Some((parent_id, mut guard)) = ancestors.pop() {
            let Node::Internal(parent) = &mut *guard else {
                unreachable!("only internal nodes are kept as ancestors");
            };

            parent.insert(separator, right_id);
            self.arena.set_parent(right_id, Some(parent_id));
            if parent.keys.len() <= self.order {
                return;
            }

            let (median, sibling) = parent.split();
            let moved = sibling.children.clone();
            let sibling_id = self
                .arena
                .alloc(Node::Internal(sibling), self.arena.parent(parent_id));
            for child in moved {
                self.arena.set_parent(child, Some(sibling_id));
            }
            tracing::debug!(node = parent_id, right = sibling_id, "split internal node");

            left_id = parent_id;
            separator = median;
            right_id = sibling_id;
        }

        // `left_id` was the root
        let root = InternalNode::with_children(left_id, separator, right_id);
        let root_id = self.arena.alloc(Node::Internal(root), None);
        self.arena.set_parent(left_id, Some(root_id));
        self.arena.set_parent(right_id, Some(root_id));
        meta.root = root_id;
        meta.height += 1;
        tracing::debug!(root = root_id, height = meta.height, "grew new root");
    }
}

impl<K: Ord + Clone, V: Clone> Default for BPlusTree<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

impl<K, V> std::fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = *self.meta.read();
        f.debug_struct("BPlusTree")
            .field("order", &self.order)
            .field("height", &meta.height)
            .field("root", &meta.root)
            .finish_non_exhaustive()
    }
}
