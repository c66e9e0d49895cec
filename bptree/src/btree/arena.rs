//! Node arena with per-slot latches.
//!
//! Every node lives in a slot addressed by its `NodeId`. A slot owns the
//! node's reader/writer latch and the node's parent handle. Latches are handed
//! out as `Arc`s so that traversal code can hold an owned guard on one node
//! while it acquires the guard of the next one (latch coupling).
//!
//! The slot table has its own lock. It is only held long enough to clone a
//! latch, push a slot or touch a parent handle, and never while waiting on a
//! node latch.

// The arena refuses to grow past `NodeId::MAX` slots, so slot indices fit.
#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::btree::node::{Node, NodeId};

/// Shared latch guarding one node.
pub type NodeLatch<K, V> = Arc<RwLock<Node<K, V>>>;

/// Owned shared guard on a node.
pub type NodeReadGuard<K, V> = ArcRwLockReadGuard<RawRwLock, Node<K, V>>;

/// Owned exclusive guard on a node.
pub type NodeWriteGuard<K, V> = ArcRwLockWriteGuard<RawRwLock, Node<K, V>>;

struct Slot<K, V> {
    latch: NodeLatch<K, V>,
    parent: Option<NodeId>,
}

/// Storage for all nodes of one tree.
pub struct NodeArena<K, V> {
    slots: RwLock<Vec<Slot<K, V>>>,
}

impl<K, V> NodeArena<K, V> {
    /// Create an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Build an arena from nodes whose handles are their positions.
    #[must_use]
    pub fn from_nodes(nodes: Vec<(Node<K, V>, Option<NodeId>)>) -> Self {
        let slots = nodes
            .into_iter()
            .map(|(node, parent)| Slot {
                latch: Arc::new(RwLock::new(node)),
                parent,
            })
            .collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// Add a node and return its handle.
    ///
    /// The node is unreachable until some other node links to it, so no latch
    /// is taken on it here.
    pub fn alloc(&self, node: Node<K, V>, parent: Option<NodeId>) -> NodeId {
        let mut slots = self.slots.write();
        assert!(
            slots.len() < NodeId::MAX as usize,
            "node arena exhausted its handle space"
        );
        let id = slots.len() as NodeId;
        slots.push(Slot {
            latch: Arc::new(RwLock::new(node)),
            parent,
        });
        id
    }

    /// Number of allocated nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no node has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// The latch of a node.
    #[must_use]
    pub fn latch(&self, id: NodeId) -> NodeLatch<K, V> {
        Arc::clone(&self.slots.read()[id as usize].latch)
    }

    /// Acquire a shared guard on a node.
    #[must_use]
    pub fn read(&self, id: NodeId) -> NodeReadGuard<K, V> {
        self.latch(id).read_arc()
    }

    /// Acquire an exclusive guard on a node.
    #[must_use]
    pub fn write(&self, id: NodeId) -> NodeWriteGuard<K, V> {
        self.latch(id).write_arc()
    }

    /// Parent handle of a node, `None` for the root.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots.read()[id as usize].parent
    }

    /// Reassign the parent handle of a node.
    ///
    /// Callers hold the tree-wide exclusive lock.
    pub fn set_parent(&self, id: NodeId, parent: Option<NodeId>) {
        self.slots.write()[id as usize].parent = parent;
    }
}

impl<K, V> Default for NodeArena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
