//! End-to-end tests against the public tree API.
//!
//! Each test file covers a specific scenario: concurrent workloads,
//! randomized workloads checked against a model, split shapes, and
//! persistence of trees that were built concurrently.

#![cfg(test)]

mod helpers;

mod test_concurrent_inserts;
mod test_concurrent_mixed;
mod test_model_workload;
mod test_persistence;
mod test_split_shapes;
