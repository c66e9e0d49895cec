//! CLI configuration module.
//!
//! This module provides configuration loading for the `bptree` binary from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_ORDER`: Maximum keys per node (default: `4`)
//! - `BPTREE_SNAPSHOT_PATH`: Snapshot file to load at start-up and save on exit
//!   (default: `./bptree.snapshot`)
//! - `BPTREE_CHECKPOINT_INTERVAL_SECS`: Seconds between background saves,
//!   `0` disables checkpointing (default: `0`)
//!
//! # Invariants
//!
//! - `order` is whatever was requested; the tree coerces orders below 3
//! - `checkpoint_interval_secs == 0` means no checkpoint schedule is started

use std::path::PathBuf;

use crate::btree::DEFAULT_ORDER;

/// Environment variable holding the tree order.
pub const ORDER_VAR: &str = "BPTREE_ORDER";
/// Environment variable holding the snapshot path.
pub const SNAPSHOT_PATH_VAR: &str = "BPTREE_SNAPSHOT_PATH";
/// Environment variable holding the checkpoint interval.
pub const CHECKPOINT_INTERVAL_VAR: &str = "BPTREE_CHECKPOINT_INTERVAL_SECS";

/// Tree configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum number of keys per node for a newly created tree.
    /// A loaded snapshot keeps the order it was saved with.
    pub order: usize,
    /// Where the tree is loaded from and saved to.
    pub snapshot_path: PathBuf,
    /// Seconds between checkpoints, 0 to disable.
    pub checkpoint_interval_secs: u64,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            snapshot_path: PathBuf::from(Self::DEFAULT_SNAPSHOT_PATH),
            checkpoint_interval_secs: 0,
        }
    }
}

impl TreeConfig {
    /// Default snapshot path.
    pub const DEFAULT_SNAPSHOT_PATH: &'static str = "./bptree.snapshot";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BPTREE_ORDER` or `BPTREE_CHECKPOINT_INTERVAL_SECS`
    /// is set but not a non-negative integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let order = match lookup(ORDER_VAR) {
            Some(value) => parse_number(ORDER_VAR, &value)?,
            None => defaults.order,
        };
        let snapshot_path = lookup(SNAPSHOT_PATH_VAR)
            .filter(|value| !value.is_empty())
            .map_or(defaults.snapshot_path, PathBuf::from);
        let checkpoint_interval_secs = match lookup(CHECKPOINT_INTERVAL_VAR) {
            Some(value) => parse_number(CHECKPOINT_INTERVAL_VAR, &value)?,
            None => defaults.checkpoint_interval_secs,
        };

        Ok(Self {
            order,
            snapshot_path,
            checkpoint_interval_secs,
        })
    }

    /// Whether a checkpoint schedule should run.
    #[must_use]
    pub const fn checkpoint_enabled(&self) -> bool {
        self.checkpoint_interval_secs > 0
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a non-negative integer"),
        })
}
