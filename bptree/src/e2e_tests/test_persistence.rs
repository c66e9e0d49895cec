//! Test saving and reloading trees that were built concurrently.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::tempdir;

use crate::btree::BPlusTree;
use crate::e2e_tests::helpers::*;

#[test]
fn test_snapshot_after_concurrent_writes() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("concurrent.snapshot");

    let tree = shared_tree(5);
    thread::scope(|s| {
        for w in 0..4u64 {
            let tree = &tree;
            s.spawn(move || {
                for i in 0..400 {
                    let k = i * 4 + w;
                    tree.insert(key(k), value_for(k));
                }
            });
        }
    });
    for k in (0..1600).step_by(10) {
        tree.delete(&key(k));
    }
    tree.save(&path).expect("save");

    let loaded: TestTree = BPlusTree::load(&path).expect("load");
    assert_eq!(loaded.order(), 5);
    assert_eq!(loaded.height(), tree.height());
    assert_eq!(loaded.range(..), tree.range(..));
    assert_eq!(
        loaded.check_invariants().expect("loaded tree is well formed"),
        tree.check_invariants().expect("original tree is well formed")
    );
}

#[test]
fn test_loaded_tree_accepts_writes() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("grow.snapshot");

    let tree = shared_tree(3);
    for k in 0..100 {
        tree.insert(key(k), value_for(k));
    }
    tree.save(&path).expect("save");

    let loaded: TestTree = BPlusTree::load(&path).expect("load");
    for k in 100..300 {
        loaded.insert(key(k), value_for(k));
    }
    for k in 0..300 {
        assert_eq!(loaded.search(&key(k)), Some(value_for(k)), "key {k}");
    }
    loaded.check_invariants().expect("invariants hold");
}

#[test]
fn test_save_during_concurrent_writes() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("live.snapshot");

    let tree = shared_tree(4);
    thread::scope(|s| {
        let writer_tree = &tree;
        s.spawn(move || {
            for k in 0..3000 {
                writer_tree.insert(key(k), value_for(k));
            }
        });
        for _ in 0..5 {
            tree.save(&path).expect("save while writing");
            // Every intermediate snapshot is a consistent tree
            let loaded: TestTree = BPlusTree::load(&path).expect("load");
            loaded.check_invariants().expect("snapshot is well formed");
            thread::sleep(Duration::from_millis(2));
        }
    });

    tree.save(&path).expect("final save");
    let loaded: TestTree = BPlusTree::load(&path).expect("load");
    assert_eq!(loaded.len(), 3000);
}

#[tokio::test]
async fn test_checkpoint_during_writes() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("checkpoint.snapshot");

    let tree = shared_tree(4);
    tree.start_checkpoint(&path, 1).expect("start checkpoint");

    let writer = {
        let tree = Arc::clone(&tree);
        tokio::task::spawn_blocking(move || {
            for k in 0..2000 {
                tree.insert(key(k), value_for(k));
            }
        })
    };
    writer.await.expect("writer finished");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tree.checkpoint_stats().completed() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tree.stop_checkpoint();
    assert!(tree.checkpoint_stats().completed() > 0);
    assert_eq!(tree.checkpoint_stats().failed(), 0);

    let loaded: TestTree = BPlusTree::load(&path).expect("load");
    loaded.check_invariants().expect("snapshot is well formed");
}
