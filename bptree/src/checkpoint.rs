//! Background checkpointing of a tree to a snapshot file.
//!
//! A checkpoint schedule saves the whole tree to a fixed path on a fixed
//! interval until it is stopped.
//!
//! # Design
//!
//! The schedule is a Tokio task that holds a `Weak` reference to the tree:
//! - The tree owns the task's stop signal
//! - When the tree is dropped the stop signal is dropped with it, and the task
//!   also finds `Weak::upgrade()` returning `None`, so it exits either way
//! - Each save runs on the blocking pool so the timer never stalls the runtime
//!
//! Called from within a Tokio runtime, the task runs on that runtime. Called
//! from plain threads, the schedule gets a dedicated thread driving its own
//! single-threaded runtime, which exits with the task.
//!
//! A failed save does not end the schedule. It is logged and counted in
//! `CheckpointStats`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::btree::BPlusTree;
use crate::codec::NodeCodec;

/// Counters describing the outcome of scheduled saves.
#[derive(Debug, Default)]
pub struct CheckpointStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl CheckpointStats {
    /// Number of scheduled saves that succeeded.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Number of scheduled saves that failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Where a schedule's task runs.
enum CheckpointTask {
    /// On the caller's runtime.
    Runtime(JoinHandle<()>),
    /// On a dedicated thread with its own runtime.
    Thread(std::thread::JoinHandle<()>),
}

impl CheckpointTask {
    fn is_finished(&self) -> bool {
        match self {
            Self::Runtime(task) => task.is_finished(),
            Self::Thread(thread) => thread.is_finished(),
        }
    }
}

/// A running schedule.
struct CheckpointHandle {
    stop: oneshot::Sender<()>,
    task: CheckpointTask,
}

impl CheckpointHandle {
    /// Signal the task to stop. A save already in flight runs to completion.
    fn cancel(self) {
        // The task may already have exited; then there is nobody to tell.
        let _ = self.stop.send(());
        drop(self.task);
    }
}

/// Checkpoint state owned by a tree.
#[derive(Default)]
pub(crate) struct CheckpointSlot {
    handle: Mutex<Option<CheckpointHandle>>,
    stats: Arc<CheckpointStats>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + NodeCodec + Send + Sync + 'static,
    V: Clone + NodeCodec + Send + Sync + 'static,
{
    /// Save the tree to `path` every `interval_secs` seconds.
    ///
    /// Replaces any schedule that is already running. Inside a Tokio runtime
    /// the schedule is spawned there; otherwise it gets its own thread.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval_secs` is zero, or if no runtime is
    /// available and the dedicated checkpoint thread cannot be started.
    pub fn start_checkpoint(
        self: &Arc<Self>,
        path: impl Into<PathBuf>,
        interval_secs: u64,
    ) -> Result<(), CheckpointError> {
        if interval_secs == 0 {
            return Err(CheckpointError::InvalidInterval(interval_secs));
        }

        let path = path.into();
        let (stop_tx, stop_rx) = oneshot::channel();
        let schedule = checkpoint_loop(
            Arc::downgrade(self),
            path.clone(),
            Duration::from_secs(interval_secs),
            stop_rx,
            Arc::clone(&self.checkpoint.stats),
        );
        let task = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => CheckpointTask::Runtime(runtime.spawn(schedule)),
            Err(_) => CheckpointTask::Thread(spawn_checkpoint_thread(schedule)?),
        };

        let previous = self
            .checkpoint
            .handle
            .lock()
            .replace(CheckpointHandle {
                stop: stop_tx,
                task,
            });
        if let Some(previous) = previous {
            previous.cancel();
            tracing::debug!("replaced previous checkpoint schedule");
        }

        tracing::info!(
            path = %path.display(),
            interval_secs,
            "checkpoint schedule started"
        );
        Ok(())
    }
}

impl<K, V> BPlusTree<K, V> {
    /// Stop the running checkpoint schedule, if any.
    ///
    /// Safe to call repeatedly or without a prior start.
    pub fn stop_checkpoint(&self) {
        if let Some(handle) = self.checkpoint.handle.lock().take() {
            handle.cancel();
            tracing::info!("checkpoint schedule stopped");
        }
    }

    /// Whether a checkpoint schedule is running.
    #[must_use]
    pub fn is_checkpointing(&self) -> bool {
        self.checkpoint
            .handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Outcome counters for scheduled saves.
    #[must_use]
    pub fn checkpoint_stats(&self) -> &CheckpointStats {
        &self.checkpoint.stats
    }
}

/// Drive `schedule` on a new thread with a single-threaded runtime.
fn spawn_checkpoint_thread<F>(schedule: F) -> Result<std::thread::JoinHandle<()>, CheckpointError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| CheckpointError::Spawn(e.to_string()))?;
    std::thread::Builder::new()
        .name("bptree-checkpoint".to_string())
        .spawn(move || runtime.block_on(schedule))
        .map_err(|e| CheckpointError::Spawn(e.to_string()))
}

/// The schedule loop.
///
/// Runs until stopped, until the stop sender is dropped, or until the tree is
/// dropped.
async fn checkpoint_loop<K, V>(
    weak_tree: Weak<BPlusTree<K, V>>,
    path: PathBuf,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
    stats: Arc<CheckpointStats>,
) where
    K: Ord + Clone + NodeCodec + Send + Sync + 'static,
    V: Clone + NodeCodec + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let Some(tree) = weak_tree.upgrade() else {
            break;
        };

        let target = path.clone();
        match tokio::task::spawn_blocking(move || tree.save(&target)).await {
            Ok(Ok(())) => {
                stats.record_success();
                tracing::debug!(path = %path.display(), "checkpoint saved");
            }
            Ok(Err(e)) => {
                stats.record_failure();
                tracing::warn!(path = %path.display(), "checkpoint failed: {e}");
            }
            Err(e) => {
                stats.record_failure();
                tracing::warn!(path = %path.display(), "checkpoint task aborted: {e}");
            }
        }
    }

    tracing::debug!(path = %path.display(), "checkpoint loop exited");
}

/// Errors that can occur when starting a checkpoint schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The dedicated checkpoint thread or its runtime could not be created.
    Spawn(String),
    /// The interval must be at least one second.
    InvalidInterval(u64),
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(msg) => write!(f, "failed to start checkpoint thread: {msg}"),
            Self::InvalidInterval(secs) => {
                write!(f, "invalid checkpoint interval: {secs}s (must be at least 1s)")
            }
        }
    }
}

impl std::error::Error for CheckpointError {}
