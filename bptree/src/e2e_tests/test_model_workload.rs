//! Test seeded random workloads against an ordered map model.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;

fn run_workload(seed: u64, order: usize, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let tree = shared_tree(order);
    let mut model = BTreeMap::new();

    for step in 0..steps {
        let k = key(rng.random_range(0..300));
        match rng.random_range(0..10) {
            0..=5 => {
                let v = rng.random::<u64>();
                assert_eq!(tree.insert(k.clone(), v), model.insert(k, v), "step {step}");
            }
            6..=7 => {
                assert_eq!(tree.remove(&k), model.remove(&k), "step {step}");
            }
            _ => {
                assert_eq!(tree.search(&k), model.get(&k).copied(), "step {step}");
            }
        }

        if step % 250 == 0 {
            tree.check_invariants().expect("invariants hold");
        }
    }

    assert_matches_model(&tree, &model);

    let lo = key(50);
    let hi = key(150);
    let expected: Vec<(Vec<u8>, u64)> = model
        .range(lo.clone()..hi.clone())
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    assert_eq!(tree.range(lo..hi), expected);
}

#[test]
fn test_random_workload_order_3() {
    run_workload(0x5eed, 3, 5000);
}

#[test]
fn test_random_workload_order_4() {
    run_workload(42, 4, 5000);
}

#[test]
fn test_random_workload_wide_nodes() {
    run_workload(7, 32, 5000);
}

#[test]
fn test_workload_is_deterministic() {
    fn shape(seed: u64) -> (usize, usize, Vec<(Vec<u8>, u64)>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let tree = shared_tree(3);
        for _ in 0..1000 {
            tree.insert(key(rng.random_range(0..500)), rng.random());
        }
        (tree.height(), tree.node_count(), tree.range(..))
    }

    assert_eq!(shape(99), shape(99));
}
