//! In-memory concurrent B+Tree.
//!
//! This module provides an ordered key-value map that many threads can read
//! and write at once.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: store separator keys and child handles
//! - Leaf nodes: store key-value pairs, linked left to right for range scans
//!
//! Nodes live in a `NodeArena` and refer to each other by `NodeId`.
//!
//! # Usage
//!
//! ```
//! use bptree::BPlusTree;
//!
//! let tree = BPlusTree::new(3);
//! for (i, key) in ["key1", "key2", "key3", "key4"].into_iter().enumerate() {
//!     tree.insert(key.as_bytes().to_vec(), i);
//! }
//!
//! assert_eq!(tree.height(), 2);
//! assert_eq!(tree.search(&b"key3".to_vec()), Some(2));
//! assert!(tree.delete(&b"key3".to_vec()));
//! assert_eq!(tree.search(&b"key3".to_vec()), None);
//! ```

mod arena;
mod node;
mod tree;

pub use arena::{NodeArena, NodeLatch, NodeReadGuard, NodeWriteGuard};
pub use node::{InternalNode, LeafNode, Node, NodeId, NodeType};
pub use tree::{BPlusTree, DEFAULT_ORDER, MIN_ORDER, effective_order};
