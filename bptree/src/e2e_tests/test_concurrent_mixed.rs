//! Test readers, writers and deleters running at the same time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::e2e_tests::helpers::*;

#[test]
fn test_mixed_readers_and_writers() {
    let tree = shared_tree(4);

    // Keys 0..1000 are stable; the writers own 1000.. and the deleter
    // removes odd stable keys.
    for k in 0..1000 {
        tree.insert(key(k), value_for(k));
    }
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for w in 0..3u64 {
            let tree = &tree;
            s.spawn(move || {
                for i in 0..1000 {
                    let k = 1000 + i * 3 + w;
                    tree.insert(key(k), value_for(k));
                }
            });
        }

        {
            let tree = &tree;
            s.spawn(move || {
                for k in (1..1000).step_by(2) {
                    assert!(tree.delete(&key(k)), "delete {k}");
                }
            });
        }

        for _ in 0..3 {
            let tree = &tree;
            let done = &done;
            s.spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    // Even stable keys are never touched
                    for k in (0..1000).step_by(50) {
                        assert_eq!(tree.search(&key(k)), Some(value_for(k)));
                    }
                    let scanned = tree.range(key(0)..key(100));
                    assert!(scanned.windows(2).all(|w| w[0].0 < w[1].0));
                    assert!(scanned.len() >= 50);
                }
            });
        }

        // Let the writers finish, then release the readers
        s.spawn(|| {
            while tree.len() < 4000 - 500 {
                thread::yield_now();
            }
            done.store(true, Ordering::Relaxed);
        });
    });

    for k in 0..1000 {
        let expected = (k % 2 == 0).then(|| value_for(k));
        assert_eq!(tree.search(&key(k)), expected, "stable key {k}");
    }
    for k in 1000..4000 {
        assert_eq!(tree.search(&key(k)), Some(value_for(k)), "written key {k}");
    }
    assert_eq!(tree.len(), 3500);
    tree.check_invariants().expect("invariants hold");
}

#[test]
fn test_deleting_while_splitting() {
    let tree = shared_tree(3);
    for k in (0..2000).step_by(2) {
        tree.insert(key(k), value_for(k));
    }

    thread::scope(|s| {
        let tree = &tree;
        s.spawn(move || {
            for k in (1..2000).step_by(2) {
                tree.insert(key(k), value_for(k));
            }
        });
        s.spawn(move || {
            for k in (0..2000).step_by(4) {
                assert!(tree.delete(&key(k)));
            }
        });
    });

    let expected = 2000 - 500;
    assert_eq!(tree.len(), expected);
    for k in 0..2000 {
        let present = k % 4 != 0;
        assert_eq!(tree.contains_key(&key(k)), present, "key {k}");
    }
    tree.check_invariants().expect("invariants hold");
}
