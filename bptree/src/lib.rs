// Life of an operation:
// 1. Enter through the tree-wide lock (shared for lookups and plain writes)
// 2. Latch-couple down to the leaf responsible for the key
// 3. Lookups read the leaf; writes change it in place when it has room
// 4. A write whose leaf is full retries under the exclusive tree lock and
//    splits upward as far as needed
//
// System components:
//  - Node arena with per-node latches
//  - B+Tree operations (search, insert, delete, range)
//  - Snapshot codec and atomic file writes
//  - Background checkpoint task

pub mod btree;
pub mod checkpoint;
pub mod codec;
pub mod config;
mod e2e_tests;
pub mod invariants;
pub mod shell;
pub mod snapshot;

pub use btree::{BPlusTree, DEFAULT_ORDER, MIN_ORDER};
pub use checkpoint::{CheckpointError, CheckpointStats};
pub use codec::{CodecError, NodeCodec};
pub use config::{ConfigError, TreeConfig};
pub use invariants::{InvariantViolation, TreeStats};
pub use snapshot::SnapshotError;
