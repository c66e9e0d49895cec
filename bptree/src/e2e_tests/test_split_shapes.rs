//! Test the exact shapes produced by splits at small orders.

use crate::btree::{BPlusTree, Node};
use crate::e2e_tests::helpers::*;

/// Keys of every node, level by level from the root.
fn levels(tree: &BPlusTree<u32, u32>) -> Vec<Vec<Vec<u32>>> {
    let root = tree.meta.read().root;
    let mut levels = Vec::new();
    let mut frontier = vec![root];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        let mut level = Vec::new();
        for id in frontier {
            let guard = tree.arena.read(id);
            level.push(guard.keys().to_vec());
            if let Node::Internal(node) = &*guard {
                next.extend_from_slice(&node.children);
            }
        }
        levels.push(level);
        frontier = next;
    }
    levels
}

#[test]
fn test_first_leaf_split() {
    let tree = BPlusTree::new(3);
    for k in 1..=4 {
        tree.insert(k, k);
    }
    assert_eq!(levels(&tree), vec![vec![vec![3]], vec![vec![1, 2], vec![3, 4]]]);
}

#[test]
fn test_eight_ascending_keys() {
    let tree = BPlusTree::new(3);
    for k in 0..8 {
        tree.insert(k, k);
    }
    assert_eq!(
        levels(&tree),
        vec![
            vec![vec![2, 4, 6]],
            vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7]],
        ]
    );
}

#[test]
fn test_internal_split_drops_median() {
    let tree = BPlusTree::new(3);
    for k in 0..10 {
        tree.insert(k, k);
    }
    // Separators [2,4,6,8] overflow the root; 6 moves up and stays in
    // neither half.
    assert_eq!(
        levels(&tree),
        vec![
            vec![vec![6]],
            vec![vec![2, 4], vec![8]],
            vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7], vec![8, 9]],
        ]
    );
}

#[test]
fn test_string_keys_at_order_three() {
    let tree = shared_tree(3);
    for (i, k) in ["key1", "key2", "key3", "key4"].into_iter().enumerate() {
        tree.insert(k.as_bytes().to_vec(), i as u64);
    }
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.node_count(), 3);
    for (i, k) in ["key1", "key2", "key3", "key4"].into_iter().enumerate() {
        assert_eq!(tree.search(&k.as_bytes().to_vec()), Some(i as u64));
    }
}
