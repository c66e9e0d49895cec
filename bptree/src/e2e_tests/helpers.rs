//! Common helpers for end-to-end tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::btree::BPlusTree;

/// Tree type used by most scenarios.
pub type TestTree = BPlusTree<Vec<u8>, u64>;

/// Fixed-width key so byte order matches numeric order.
#[must_use]
pub fn key(i: u64) -> Vec<u8> {
    format!("key{i:08}").into_bytes()
}

/// Value stored for `key(i)` by the concurrent scenarios.
#[must_use]
pub const fn value_for(i: u64) -> u64 {
    i * 3 + 1
}

/// A shared tree of the given order.
#[must_use]
pub fn shared_tree(order: usize) -> Arc<TestTree> {
    Arc::new(BPlusTree::new(order))
}

/// Assert that the tree holds exactly the entries of `model`.
pub fn assert_matches_model(tree: &TestTree, model: &BTreeMap<Vec<u8>, u64>) {
    let entries = tree.range(..);
    let expected: Vec<(Vec<u8>, u64)> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
    assert_eq!(entries, expected, "tree contents diverged from the model");

    let stats = tree.check_invariants().expect("invariants hold");
    assert_eq!(stats.entries, model.len());
}
