//! Test concurrent writers on disjoint keys followed by concurrent readers.

use std::thread;

use crate::e2e_tests::helpers::*;

const WRITERS: u64 = 8;
const KEYS_PER_WRITER: u64 = 500;

fn fill_concurrently(tree: &TestTree) {
    thread::scope(|s| {
        for w in 0..WRITERS {
            s.spawn(move || {
                // Interleave key ranges so writers contend for the same leaves
                for i in 0..KEYS_PER_WRITER {
                    let k = i * WRITERS + w;
                    assert_eq!(tree.insert(key(k), value_for(k)), None);
                }
            });
        }
    });
}

#[test]
fn test_disjoint_writers_then_readers() {
    let tree = shared_tree(4);
    fill_concurrently(&tree);

    let total = WRITERS * KEYS_PER_WRITER;
    thread::scope(|s| {
        for r in 0..4u64 {
            let tree = &tree;
            s.spawn(move || {
                for k in (r..total).step_by(4) {
                    assert_eq!(tree.search(&key(k)), Some(value_for(k)), "missing {k}");
                }
            });
        }
    });

    assert_eq!(tree.len(), usize::try_from(total).expect("fits"));
    let stats = tree.check_invariants().expect("invariants hold");
    assert_eq!(stats.entries, usize::try_from(total).expect("fits"));
    assert!(stats.height >= 3);
}

#[test]
fn test_concurrent_inserts_at_minimum_order() {
    // Order 3 splits on almost every fourth insert, maximizing escalations
    let tree = shared_tree(3);
    fill_concurrently(&tree);

    let total = WRITERS * KEYS_PER_WRITER;
    for k in 0..total {
        assert_eq!(tree.search(&key(k)), Some(value_for(k)), "missing {k}");
    }
    let ordered: Vec<Vec<u8>> = tree.range(..).into_iter().map(|(k, _)| k).collect();
    let expected: Vec<Vec<u8>> = (0..total).map(key).collect();
    assert_eq!(ordered, expected);
    tree.check_invariants().expect("invariants hold");
}

#[test]
fn test_concurrent_upserts_of_same_keys() {
    let tree = shared_tree(4);
    for k in 0..200 {
        tree.insert(key(k), 0);
    }

    thread::scope(|s| {
        for w in 1..=4u64 {
            let tree = &tree;
            s.spawn(move || {
                for k in 0..200 {
                    assert!(tree.insert(key(k), w).is_some());
                }
            });
        }
    });

    // Every key ends up with exactly one of the written values
    for k in 0..200 {
        let v = tree.search(&key(k)).expect("key present");
        assert!((1..=4).contains(&v), "unexpected value {v}");
    }
    assert_eq!(tree.len(), 200);
    tree.check_invariants().expect("invariants hold");
}
