//! B+Tree node types.
//!
//! The tree uses two node types:
//! - Internal nodes: store separator keys and child handles
//! - Leaf nodes: store key-value pairs, singly linked for range scans
//!
//! Nodes never hold owning references to each other. Children, sibling links
//! and parent links are `NodeId` handles into the tree's arena.

/// Handle of a node in the tree's arena.
pub type NodeId = u32;

/// Node type discriminant, as stored in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// A node of the tree.
#[derive(Debug, Clone)]
pub enum Node<K, V> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K, V>),
}

impl<K: Ord, V> Node<K, V> {
    /// The discriminant of this node.
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        match self {
            Self::Internal(_) => NodeType::Internal,
            Self::Leaf(_) => NodeType::Leaf,
        }
    }

    /// Keys held by this node, in sorted order.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        match self {
            Self::Internal(node) => &node.keys,
            Self::Leaf(leaf) => &leaf.keys,
        }
    }

    /// Number of keys held by this node.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys().len()
    }

    /// Child to descend into for `key`, `None` at a leaf.
    #[must_use]
    pub fn child_for(&self, key: &K) -> Option<NodeId> {
        match self {
            Self::Internal(node) => Some(node.child_for(key)),
            Self::Leaf(_) => None,
        }
    }

    /// Leftmost child, `None` at a leaf.
    #[must_use]
    pub fn first_child(&self) -> Option<NodeId> {
        match self {
            Self::Internal(node) => node.children.first().copied(),
            Self::Leaf(_) => None,
        }
    }
}

/// An internal (non-leaf) node.
///
/// Stores N keys and N+1 child handles.
/// `Child[i]` contains keys < `Key[i]`
/// `Child[i+1]` contains keys >= `Key[i]`
#[derive(Debug, Clone)]
pub struct InternalNode<K> {
    /// Separator keys in sorted order.
    pub keys: Vec<K>,
    /// Child handles. `children.len()` == `keys.len()` + 1
    pub children: Vec<NodeId>,
}

impl<K: Ord> InternalNode<K> {
    /// Create an internal node with two children, used when the root splits.
    #[must_use]
    pub fn with_children(left_child: NodeId, key: K, right_child: NodeId) -> Self {
        Self {
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Find the child index for a given key.
    ///
    /// This is the index of the first separator strictly greater than `key`,
    /// or the last child if there is none.
    #[must_use]
    pub fn find_child_index(&self, key: &K) -> usize {
        match self.keys.binary_search(key) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,    // Insert position
        }
    }

    /// Child handle responsible for `key`.
    #[must_use]
    pub fn child_for(&self, key: &K) -> NodeId {
        self.children[self.find_child_index(key)]
    }

    /// Insert a separator and the child to its right at the sorted position.
    pub fn insert(&mut self, key: K, right_child: NodeId) {
        let idx = self.find_child_index(&key);
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, right_child);
    }

    /// Split the node, returning the median key and the new right node.
    ///
    /// The median is promoted and kept in neither half.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        let mid = self.keys.len() / 2;

        // Right node gets keys and children after median
        let right_keys: Vec<K> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<NodeId> = self.children.drain(mid + 1..).collect();

        // What remains at the tail of the left node is the median
        let median_key = self.keys.remove(mid);

        let right_node = Self {
            keys: right_keys,
            children: right_children,
        };

        (median_key, right_node)
    }
}

/// A leaf node.
///
/// Stores key-value pairs and a link to the next leaf in key order.
#[derive(Debug, Clone)]
pub struct LeafNode<K, V> {
    /// Keys in sorted order.
    pub keys: Vec<K>,
    /// Values paired with `keys` by position.
    pub values: Vec<V>,
    /// The leaf holding the next larger keys, if any.
    pub next: Option<NodeId>,
}

impl<K: Ord, V> Default for LeafNode<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> LeafNode<K, V> {
    /// Create a new empty leaf node.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            next: None,
        }
    }

    /// Number of entries in the leaf.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the leaf has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &K) -> Result<usize, usize> {
        self.keys.binary_search(key)
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_index(key).ok().map(|i| &self.values[i])
    }

    /// Whether inserting `key` leaves at most `order` keys in this leaf.
    #[must_use]
    pub fn can_absorb(&self, key: &K, order: usize) -> bool {
        self.keys.len() < order || self.find_index(key).is_ok()
    }

    /// Insert or update an entry.
    ///
    /// Returns the old value if updating, None if inserting.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.find_index(&key) {
            Ok(i) => Some(std::mem::replace(&mut self.values[i], value)),
            Err(i) => {
                self.keys.insert(i, key);
                self.values.insert(i, value);
                None
            }
        }
    }

    /// Remove an entry by key.
    ///
    /// Returns the removed value if found.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let i = self.find_index(key).ok()?;
        self.keys.remove(i);
        Some(self.values.remove(i))
    }

    /// Split the node, returning the split key and the new right node.
    ///
    /// The right node inherits this leaf's `next` link; the caller links this
    /// leaf to the right node once it has a handle.
    #[must_use]
    pub fn split(&mut self) -> (K, Self)
    where
        K: Clone,
    {
        let mid = self.keys.len() / 2;

        // Right node gets entries from mid onwards
        let right_keys: Vec<K> = self.keys.drain(mid..).collect();
        let right_values: Vec<V> = self.values.drain(mid..).collect();
        let split_key = right_keys[0].clone();

        let right_node = Self {
            keys: right_keys,
            values: right_values,
            next: self.next,
        };

        (split_key, right_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_from_byte() {
        assert_eq!(NodeType::try_from(0), Ok(NodeType::Internal));
        assert_eq!(NodeType::try_from(1), Ok(NodeType::Leaf));
        assert_eq!(NodeType::try_from(7), Err(7));
    }

    #[test]
    fn test_leaf_node_insert_update() {
        let mut node: LeafNode<u32, &str> = LeafNode::new();

        // Insert new key
        let old = node.insert(1, "value1");
        assert!(old.is_none());
        assert_eq!(node.len(), 1);

        // Update existing key
        let old = node.insert(1, "updated");
        assert_eq!(old, Some("value1"));
        assert_eq!(node.len(), 1);
        assert_eq!(node.get(&1), Some(&"updated"));
    }

    #[test]
    fn test_leaf_node_keeps_sorted_order() {
        let mut node: LeafNode<u32, u32> = LeafNode::new();
        for k in [5, 1, 4, 2, 3] {
            node.insert(k, k * 10);
        }
        assert_eq!(node.keys, vec![1, 2, 3, 4, 5]);
        assert_eq!(node.values, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_leaf_node_remove() {
        let mut node: LeafNode<u32, &str> = LeafNode::new();
        node.insert(1, "value1");
        node.insert(2, "value2");

        let removed = node.remove(&1);
        assert_eq!(removed, Some("value1"));
        assert_eq!(node.len(), 1);
        assert!(node.get(&1).is_none());
        assert!(node.remove(&1).is_none());
    }

    #[test]
    fn test_leaf_can_absorb() {
        let mut node: LeafNode<u32, ()> = LeafNode::new();
        for k in 0..3 {
            node.insert(k, ());
        }
        assert!(!node.can_absorb(&9, 3));
        // Updates never grow the leaf
        assert!(node.can_absorb(&1, 3));
        assert!(node.can_absorb(&9, 4));
    }

    #[test]
    fn test_internal_node_find_child() {
        let node = InternalNode {
            keys: vec![10u32, 20, 30],
            children: vec![100, 200, 300, 400],
        };

        // Key less than first key -> first child
        assert_eq!(node.find_child_index(&5), 0);

        // Key equal to first key -> second child
        assert_eq!(node.find_child_index(&10), 1);

        // Key between first and second -> second child
        assert_eq!(node.find_child_index(&15), 1);

        // Key greater than all -> last child
        assert_eq!(node.find_child_index(&35), 3);
        assert_eq!(node.child_for(&35), 400);
    }

    #[test]
    fn test_internal_node_insert() {
        let mut node = InternalNode::with_children(1, 20u32, 2);
        node.insert(10, 3);
        node.insert(30, 4);
        assert_eq!(node.keys, vec![10, 20, 30]);
        assert_eq!(node.children, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_leaf_node_split() {
        let mut node: LeafNode<u32, u32> = LeafNode::new();
        node.next = Some(77);
        for i in 0..10 {
            node.insert(i, i);
        }

        let (split_key, right) = node.split();

        // Left node should have first half
        assert_eq!(node.keys, vec![0, 1, 2, 3, 4]);
        // Right node should have second half
        assert_eq!(right.keys, vec![5, 6, 7, 8, 9]);
        assert_eq!(right.values, vec![5, 6, 7, 8, 9]);
        // Split key should be first key of right node
        assert_eq!(split_key, 5);
        // Right inherits the sibling link
        assert_eq!(right.next, Some(77));
    }

    #[test]
    fn test_internal_node_split_excludes_median() {
        let mut node = InternalNode {
            keys: vec![10u32, 20, 30, 40],
            children: vec![0, 1, 2, 3, 4],
        };

        let (median, right) = node.split();

        assert_eq!(median, 30);
        assert_eq!(node.keys, vec![10, 20]);
        assert_eq!(node.children, vec![0, 1, 2]);
        assert_eq!(right.keys, vec![40]);
        assert_eq!(right.children, vec![3, 4]);
    }

    #[test]
    fn test_node_keys_accessor() {
        let leaf: Node<u32, ()> = Node::Leaf(LeafNode {
            keys: vec![1, 2],
            values: vec![(), ()],
            next: None,
        });
        assert_eq!(leaf.node_type(), NodeType::Leaf);
        assert_eq!(leaf.keys(), &[1, 2]);

        let internal: Node<u32, ()> = Node::Internal(InternalNode::with_children(0, 5, 1));
        assert_eq!(internal.node_type(), NodeType::Internal);
        assert_eq!(internal.key_count(), 1);
    }

    #[test]
    fn test_node_child_selection() {
        let internal: Node<u32, ()> = Node::Internal(InternalNode::with_children(3, 5, 4));
        assert_eq!(internal.child_for(&1), Some(3));
        assert_eq!(internal.child_for(&5), Some(4));
        assert_eq!(internal.first_child(), Some(3));

        let leaf: Node<u32, ()> = Node::Leaf(LeafNode::new());
        assert_eq!(leaf.child_for(&1), None);
        assert_eq!(leaf.first_child(), None);
    }
}
