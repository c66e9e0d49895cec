//! Structural invariant checking.
//!
//! Walks the whole tree under the tree-wide exclusive lock and verifies the
//! properties every operation must preserve. Used by tests after each step of
//! a workload and by the `check` command of the CLI.

use crate::btree::{BPlusTree, Node, NodeId};

/// Shape of a tree that passed the invariant check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of reachable nodes.
    pub nodes: usize,
    /// Number of leaves.
    pub leaves: usize,
    /// Number of key-value pairs.
    pub entries: usize,
    /// Number of levels.
    pub height: usize,
}

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Node where the violation was detected.
    pub node: NodeId,
    /// Description of the violation.
    pub description: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invariant violated at node {}: {}", self.node, self.description)
    }
}

impl std::error::Error for InvariantViolation {}

fn violation(node: NodeId, description: impl Into<String>) -> InvariantViolation {
    InvariantViolation {
        node,
        description: description.into(),
    }
}

/// Accumulated state of one walk.
struct Walk<K> {
    /// Leaves in left-to-right order.
    leaves: Vec<NodeId>,
    /// Nodes already reached, indexed by handle.
    visited: Vec<bool>,
    nodes: usize,
    entries: usize,
    last_key: Option<K>,
}

/// A subtree still to be checked, with the separators that bound it.
struct Pending<K> {
    id: NodeId,
    depth: usize,
    lower: Option<K>,
    upper: Option<K>,
}

impl<K: Ord + Clone, V: Clone> BPlusTree<K, V> {
    /// Verify the structure of the tree.
    ///
    /// Checks that:
    /// - keys are strictly ascending within every node and across leaves
    /// - no node holds more than `order` keys
    /// - internal nodes have one more child than keys
    /// - every key lies within the separators bounding its subtree
    /// - all leaves sit at depth `height`
    /// - every node is reached exactly once from the root
    /// - parent handles match the actual structure
    /// - the leaf chain visits exactly the leaves, left to right
    /// - every allocated node is reachable
    ///
    /// The walk keeps its own stack and never revisits a node, so it
    /// terminates on any arena, including ones with cycles.
    pub fn check_invariants(&self) -> Result<TreeStats, InvariantViolation> {
        let meta = self.meta.write();

        let allocated = self.arena.len();
        if meta.root as usize >= allocated {
            return Err(violation(meta.root, "root handle out of range"));
        }
        if self.arena.parent(meta.root).is_some() {
            return Err(violation(meta.root, "root has a parent"));
        }
        if meta.height == 0 || meta.height > allocated {
            return Err(violation(
                meta.root,
                format!("height {} impossible with {allocated} nodes", meta.height),
            ));
        }

        let mut walk = Walk {
            leaves: Vec::new(),
            visited: vec![false; allocated],
            nodes: 0,
            entries: 0,
            last_key: None,
        };
        let mut stack = vec![Pending {
            id: meta.root,
            depth: 1,
            lower: None,
            upper: None,
        }];
        while let Some(pending) = stack.pop() {
            self.check_node(pending, meta.height, &mut walk, &mut stack)?;
        }

        self.check_leaf_chain(&walk.leaves)?;

        if walk.nodes != allocated {
            return Err(violation(
                meta.root,
                format!("{} nodes reachable but {allocated} allocated", walk.nodes),
            ));
        }

        Ok(TreeStats {
            nodes: walk.nodes,
            leaves: walk.leaves.len(),
            entries: walk.entries,
            height: meta.height,
        })
    }

    /// Check one node and push its children, leftmost on top.
    fn check_node(
        &self,
        pending: Pending<K>,
        height: usize,
        walk: &mut Walk<K>,
        stack: &mut Vec<Pending<K>>,
    ) -> Result<(), InvariantViolation> {
        let Pending {
            id,
            depth,
            lower,
            upper,
        } = pending;

        match walk.visited.get_mut(id as usize) {
            Some(seen) if !*seen => *seen = true,
            Some(_) => return Err(violation(id, "node reached more than once")),
            None => return Err(violation(id, "handle out of range")),
        }
        walk.nodes += 1;

        let guard = self.arena.read(id);
        let keys = guard.keys();
        if keys.len() > self.order {
            return Err(violation(
                id,
                format!("{} keys exceed order {}", keys.len(), self.order),
            ));
        }
        if !keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(violation(id, "keys are not strictly ascending"));
        }
        if let (Some(lower), Some(first)) = (&lower, keys.first()) {
            if first < lower {
                return Err(violation(id, "key below the subtree's lower separator"));
            }
        }
        if let (Some(upper), Some(last)) = (&upper, keys.last()) {
            if last >= upper {
                return Err(violation(id, "key at or above the subtree's upper separator"));
            }
        }

        match &*guard {
            Node::Leaf(leaf) => {
                if depth != height {
                    return Err(violation(
                        id,
                        format!("leaf at depth {depth} in a tree of height {height}"),
                    ));
                }
                if leaf.values.len() != leaf.keys.len() {
                    return Err(violation(id, "key and value counts differ"));
                }
                if let (Some(previous), Some(first)) = (&walk.last_key, leaf.keys.first()) {
                    if first <= previous {
                        return Err(violation(id, "leaf keys overlap the previous leaf"));
                    }
                }
                if let Some(last) = leaf.keys.last() {
                    walk.last_key = Some(last.clone());
                }
                walk.entries += leaf.len();
                walk.leaves.push(id);
            }
            Node::Internal(node) => {
                if depth >= height {
                    return Err(violation(id, "internal node at leaf depth"));
                }
                if node.keys.is_empty() {
                    return Err(violation(id, "internal node without separators"));
                }
                if node.children.len() != node.keys.len() + 1 {
                    return Err(violation(
                        id,
                        format!(
                            "{} children for {} keys",
                            node.children.len(),
                            node.keys.len()
                        ),
                    ));
                }

                for (i, &child) in node.children.iter().enumerate().rev() {
                    if child as usize >= walk.visited.len() {
                        return Err(violation(id, format!("child handle {child} out of range")));
                    }
                    if self.arena.parent(child) != Some(id) {
                        return Err(violation(child, format!("parent handle is not {id}")));
                    }
                    let child_lower = if i == 0 {
                        lower.clone()
                    } else {
                        Some(node.keys[i - 1].clone())
                    };
                    let child_upper = node.keys.get(i).cloned().or_else(|| upper.clone());
                    stack.push(Pending {
                        id: child,
                        depth: depth + 1,
                        lower: child_lower,
                        upper: child_upper,
                    });
                }
            }
        }
        Ok(())
    }

    /// The `next` chain must link the leaves in the order the walk found them.
    fn check_leaf_chain(&self, leaves: &[NodeId]) -> Result<(), InvariantViolation> {
        for (i, &leaf_id) in leaves.iter().enumerate() {
            let guard = self.arena.read(leaf_id);
            let Node::Leaf(leaf) = &*guard else {
                return Err(violation(leaf_id, "leaf list holds an internal node"));
            };
            let expected = leaves.get(i + 1).copied();
            if leaf.next != expected {
                return Err(violation(
                    leaf_id,
                    format!("next is {:?}, expected {expected:?}", leaf.next),
                ));
            }
        }
        Ok(())
    }
}
