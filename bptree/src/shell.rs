//! Line-oriented command shell around one tree.
//!
//! The `bptree` binary reads one command per line and prints one reply per
//! command. Keys and values are UTF-8 strings without whitespace.
//!
//! # Commands
//!
//! - `put <key> <value>`: insert or update
//! - `get <key>`: look up a value
//! - `del <key>`: remove a key
//! - `range <from> <to>`: list entries with `from <= key <= to`
//! - `height`, `len`: tree shape
//! - `check`: verify structural invariants
//! - `save`: write the snapshot now
//! - `quit`: leave the shell

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::btree::BPlusTree;
use crate::config::TreeConfig;
use crate::snapshot::SnapshotError;

/// The tree type served by the shell.
pub type StringTree = BPlusTree<String, String>;

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Get(String),
    Del(String),
    Range { from: String, to: String },
    Height,
    Len,
    Check,
    Save,
    Quit,
}

/// Error returned for a line that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command word is not known.
    Unknown(String),
    /// The command got the wrong number of arguments.
    Usage(&'static str),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(word) => write!(f, "unknown command: {word}"),
            Self::Usage(usage) => write!(f, "usage: {usage}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl Command {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (word, args.as_slice()) {
            ("put", [key, value]) => Self::Put {
                key: (*key).to_string(),
                value: (*value).to_string(),
            },
            ("put", _) => return Err(CommandError::Usage("put <key> <value>")),
            ("get", [key]) => Self::Get((*key).to_string()),
            ("get", _) => return Err(CommandError::Usage("get <key>")),
            ("del", [key]) => Self::Del((*key).to_string()),
            ("del", _) => return Err(CommandError::Usage("del <key>")),
            ("range", [from, to]) => Self::Range {
                from: (*from).to_string(),
                to: (*to).to_string(),
            },
            ("range", _) => return Err(CommandError::Usage("range <from> <to>")),
            ("height", []) => Self::Height,
            ("len", []) => Self::Len,
            ("check", []) => Self::Check,
            ("save", []) => Self::Save,
            ("quit" | "exit", []) => Self::Quit,
            ("height" | "len" | "check" | "save" | "quit" | "exit", _) => {
                return Err(CommandError::Usage("command takes no arguments"));
            }
            (other, _) => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Print the reply and read the next command.
    Reply(String),
    /// Leave the shell.
    Quit,
}

/// A tree bound to its snapshot file.
pub struct Shell {
    tree: Arc<StringTree>,
    snapshot_path: PathBuf,
}

impl Shell {
    /// Load the configured snapshot, or start an empty tree if there is none.
    pub fn open(config: &TreeConfig) -> Result<Self, SnapshotError> {
        let path = &config.snapshot_path;
        let tree = if path.exists() {
            let tree = StringTree::load(path)?;
            tracing::info!(
                path = %path.display(),
                entries = tree.len(),
                height = tree.height(),
                "loaded snapshot"
            );
            tree
        } else {
            tracing::info!(path = %path.display(), order = config.order, "starting empty tree");
            StringTree::new(config.order)
        };

        Ok(Self {
            tree: Arc::new(tree),
            snapshot_path: path.clone(),
        })
    }

    /// The served tree.
    #[must_use]
    pub const fn tree(&self) -> &Arc<StringTree> {
        &self.tree
    }

    /// The snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Write the tree to its snapshot file.
    pub fn save(&self) -> Result<(), SnapshotError> {
        self.tree.save(&self.snapshot_path)
    }

    /// Run one command against the tree.
    pub fn execute(&self, command: Command) -> Outcome {
        let reply = match command {
            Command::Put { key, value } => match self.tree.insert(key, value) {
                Some(old) => format!("updated (was {old})"),
                None => "inserted".to_string(),
            },
            Command::Get(key) => self
                .tree
                .search(&key)
                .unwrap_or_else(|| "(not found)".to_string()),
            Command::Del(key) => {
                if self.tree.delete(&key) {
                    "deleted".to_string()
                } else {
                    "(not found)".to_string()
                }
            }
            Command::Range { from, to } => {
                let entries = self.tree.range(from..=to);
                let mut out = String::new();
                for (key, value) in &entries {
                    let _ = writeln!(out, "{key} {value}");
                }
                let _ = write!(out, "({} entries)", entries.len());
                out
            }
            Command::Height => self.tree.height().to_string(),
            Command::Len => self.tree.len().to_string(),
            Command::Check => match self.tree.check_invariants() {
                Ok(stats) => format!(
                    "ok: {} nodes, {} leaves, {} entries, height {}",
                    stats.nodes, stats.leaves, stats.entries, stats.height
                ),
                Err(e) => format!("FAILED: {e}"),
            },
            Command::Save => match self.save() {
                Ok(()) => format!("saved to {}", self.snapshot_path.display()),
                Err(e) => format!("save failed: {e}"),
            },
            Command::Quit => return Outcome::Quit,
        };
        Outcome::Reply(reply)
    }
}
