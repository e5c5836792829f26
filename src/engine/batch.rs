//! Batch orchestration.
//!
//! [`BatchRunner`] is the single entry point every command uses: it resets the
//! cancellation token, partitions the selection, starts the progress display,
//! submits one task per chunk, waits for the pool to drain and aggregates the
//! per-item outcomes into a [`BatchReport`].

use std::collections::BTreeSet;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::cancel::{CancellationToken, Cancelled};
use super::partition::{Chunk, DEFAULT_MAX_CHUNK_SIZE, Partitioner, calculate_optimal_workers};
use super::pool::{PoolError, TaskError, WorkerPool, panic_message};
use super::progress::{ProgressOptions, ProgressSnapshot, ProgressState, ProgressTracker};

/// Result of processing one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed(String),
    Skipped(String),
    Failed(String),
    Cancelled(String),
}

impl ItemOutcome {
    /// Completed and skipped items count as done; failed and cancelled ones as failed.
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Completed(_) | ItemOutcome::Skipped(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ItemOutcome::Completed(message)
            | ItemOutcome::Skipped(message)
            | ItemOutcome::Failed(message)
            | ItemOutcome::Cancelled(message) => message,
        }
    }
}

/// Number of items per outcome kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed + self.cancelled
    }
}

/// Messages collected for each outcome kind.
///
/// Identical messages collapse in the sets; `counts` holds one tick per item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSets {
    pub completed: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub cancelled: BTreeSet<String>,
    pub counts: OutcomeCounts,
}

impl OutcomeSets {
    fn insert(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed(message) => {
                self.counts.completed += 1;
                self.completed.insert(message)
            }
            ItemOutcome::Skipped(message) => {
                self.counts.skipped += 1;
                self.skipped.insert(message)
            }
            ItemOutcome::Failed(message) => {
                self.counts.failed += 1;
                self.failed.insert(message)
            }
            ItemOutcome::Cancelled(message) => {
                self.counts.cancelled += 1;
                self.cancelled.insert(message)
            }
        };
    }
}

/// Something that can be named in an outcome message.
pub trait BatchItem {
    fn describe(&self) -> String;
}

impl BatchItem for PathBuf {
    fn describe(&self) -> String {
        self.display().to_string()
    }
}

impl BatchItem for String {
    fn describe(&self) -> String {
        self.clone()
    }
}

impl BatchItem for usize {
    fn describe(&self) -> String {
        self.to_string()
    }
}

/// What a task body sees while processing one item.
pub struct ItemContext<'a> {
    token: &'a CancellationToken,
    progress: &'a ProgressState,
    #[cfg(test)]
    cancel_after_bytes: Option<u64>,
}

impl<'a> ItemContext<'a> {
    pub fn new(token: &'a CancellationToken, progress: &'a ProgressState) -> Self {
        Self {
            token,
            progress,
            #[cfg(test)]
            cancel_after_bytes: None,
        }
    }

    /// Sets `token` as soon as `bytes` have been reported through [`add_bytes`](Self::add_bytes).
    #[cfg(test)]
    pub(crate) fn cancelling_after(token: &'a CancellationToken, progress: &'a ProgressState, bytes: u64) -> Self {
        Self {
            token,
            progress,
            cancel_after_bytes: Some(bytes),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_set()
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        self.token.check()
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.progress.add_bytes(bytes);
        #[cfg(test)]
        {
            let reached = self
                .cancel_after_bytes
                .is_some_and(|limit| self.progress.snapshot().completed_bytes >= limit);
            if reached {
                self.token.set();
            }
        }
    }
}

/// Tuning for batch execution.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_threads: usize,
    pub max_chunk_size: usize,
    pub progress: ProgressOptions,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_threads: calculate_optimal_workers(100),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            progress: ProgressOptions::default(),
        }
    }
}

/// Aggregated result of one batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub label: String,
    pub outcomes: OutcomeSets,
    pub progress: ProgressSnapshot,
    pub workers: usize,
    pub chunks: usize,
    pub elapsed: Duration,
    pub task_errors: Vec<TaskError>,
}

impl BatchReport {
    fn empty(label: &str) -> Self {
        Self {
            label: label.to_string(),
            outcomes: OutcomeSets::default(),
            progress: ProgressSnapshot::default(),
            workers: 0,
            chunks: 0,
            elapsed: Duration::ZERO,
            task_errors: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.counts.failed > 0 || !self.task_errors.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes.counts.cancelled > 0
    }

    /// Failed and cancelled items plus chunk tasks that died outside an item.
    pub fn unfinished(&self) -> usize {
        self.outcomes.counts.failed + self.outcomes.counts.cancelled + self.task_errors.len()
    }
}

/// Runs selections of items over a fresh worker pool.
pub struct BatchRunner {
    settings: BatchSettings,
    token: CancellationToken,
}

impl BatchRunner {
    pub fn new(settings: BatchSettings, token: CancellationToken) -> Self {
        Self { settings, token }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runs `op` on every item using the default chunking policy.
    pub fn run<I, F>(&self, label: &str, items: Vec<I>, total_bytes: u64, op: F) -> Result<BatchReport, PoolError>
    where
        I: BatchItem + Send + 'static,
        F: Fn(&I, &ItemContext<'_>) -> ItemOutcome + Send + Sync + 'static,
    {
        let item_count = items.len();
        let partitioner = self.partitioner(item_count);
        let chunks = partitioner.split(items);
        self.execute(label, chunks, item_count, partitioner.parallelism(), total_bytes, op)
    }

    /// Like [`run`](Self::run), but items mapping to the same destination share one task.
    pub fn run_with_destinations<I, K, D, F>(
        &self,
        label: &str,
        items: Vec<I>,
        total_bytes: u64,
        destination: D,
        op: F,
    ) -> Result<BatchReport, PoolError>
    where
        I: BatchItem + Send + 'static,
        K: Eq + Hash,
        D: Fn(&I) -> Option<K>,
        F: Fn(&I, &ItemContext<'_>) -> ItemOutcome + Send + Sync + 'static,
    {
        let item_count = items.len();
        let partitioner = self.partitioner(item_count);
        let chunks = partitioner.split_by_destination(items, destination);
        self.execute(label, chunks, item_count, partitioner.parallelism(), total_bytes, op)
    }

    fn partitioner(&self, item_count: usize) -> Partitioner {
        Partitioner::new(item_count, self.settings.max_threads, self.settings.max_chunk_size)
    }

    fn execute<I, F>(
        &self,
        label: &str,
        chunks: Vec<Chunk<I>>,
        item_count: usize,
        workers: usize,
        total_bytes: u64,
        op: F,
    ) -> Result<BatchReport, PoolError>
    where
        I: BatchItem + Send + 'static,
        F: Fn(&I, &ItemContext<'_>) -> ItemOutcome + Send + Sync + 'static,
    {
        self.token.reset();
        if item_count == 0 {
            return Ok(BatchReport::empty(label));
        }

        let started = Instant::now();
        let chunk_count = chunks.len();
        tracing::info!(
            "{}: {} item(s) in {} chunk(s) on {} worker(s)",
            label,
            item_count,
            chunk_count,
            workers
        );

        let pool = WorkerPool::new(workers)?;
        let tracker = ProgressTracker::start(label, total_bytes, item_count, &self.settings.progress);
        let outcomes = Arc::new(Mutex::new(OutcomeSets::default()));
        let op = Arc::new(op);

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let op = Arc::clone(&op);
                let token = self.token.clone();
                let progress = tracker.state();
                let outcomes = Arc::clone(&outcomes);
                pool.submit(move || run_chunk(chunk, op.as_ref(), &token, &progress, &outcomes))
            })
            .collect();

        pool.wait_all();

        let mut task_errors = Vec::new();
        for handle in handles {
            if let Err(e) = handle.wait() {
                tracing::warn!("{}: chunk task failed: {}", label, e);
                task_errors.push(e);
            }
        }

        let progress = tracker.finish();
        drop(pool);

        let outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(PoisonError::into_inner));
        let elapsed = started.elapsed();
        tracing::info!(
            "{}: {} completed, {} skipped, {} failed, {} cancelled in {:.2}s",
            label,
            outcomes.counts.completed,
            outcomes.counts.skipped,
            outcomes.counts.failed,
            outcomes.counts.cancelled,
            elapsed.as_secs_f64()
        );

        Ok(BatchReport {
            label: label.to_string(),
            outcomes,
            progress,
            workers,
            chunks: chunk_count,
            elapsed,
            task_errors,
        })
    }
}

fn run_chunk<I, F>(
    chunk: Chunk<I>,
    op: &F,
    token: &CancellationToken,
    progress: &ProgressState,
    outcomes: &Mutex<OutcomeSets>,
) where
    I: BatchItem,
    F: Fn(&I, &ItemContext<'_>) -> ItemOutcome,
{
    let ctx = ItemContext::new(token, progress);
    for item in chunk {
        let outcome = if ctx.is_cancelled() {
            ItemOutcome::Cancelled(format!("{}: not started", item.describe()))
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| op(&item, &ctx))) {
                Ok(outcome) => outcome,
                Err(payload) => ItemOutcome::Failed(format!(
                    "{}: panicked: {}",
                    item.describe(),
                    panic_message(payload.as_ref())
                )),
            }
        };

        tracing::debug!("{:?}", outcome);
        if outcome.is_success() {
            progress.record_completed();
        } else {
            progress.record_failed();
        }
        outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(outcome);
    }
}
