//! Concurrent batch execution engine
//!
//! Every isocmd command turns its selection into a batch of independent work
//! items and hands it to this module.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  Command    │    │  Partitioner │    │  WorkerPool  │    │  Progress    │
//! │             │───▶│              │───▶│              │───▶│  Tracker     │
//! │ • selection │    │ • chunking   │    │ • N queues   │    │ • counters   │
//! │ • item op   │    │ • collisions │    │ • stealing   │    │ • status bar │
//! └─────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!                                               │
//!                                               ▼
//!                                     ┌──────────────────┐
//!                                     │ CancellationToken│
//!                                     └──────────────────┘
//! ```
//!
//! ## What This Module Does:
//! - **Queueing**: Michael-Scott lock-free FIFO backed by a generation-tagged node arena
//! - **Scheduling**: one queue per worker, randomized work stealing when a worker starves
//! - **Partitioning**: chunk sizing and the destination collision rule
//! - **Cancellation**: a shared flag polled cooperatively by item bodies
//! - **Reporting**: atomic counters rendered by a display thread, aggregated outcome sets
//!
//! ## What This Module Does NOT Do:
//! - **Domain Logic**: decoding sectors, mounting, copying and renaming live in `crate::ops`
//! - **Signals**: the interrupt handler is installed by `crate::signal`
//!
//! # Example
//!
//! ```rust,no_run
//! use isocmd::engine::{BatchRunner, BatchSettings, CancellationToken, ItemOutcome};
//!
//! let runner = BatchRunner::new(BatchSettings::default(), CancellationToken::process());
//! let report = runner.run("Counting", (0..10usize).collect(), 0, |item, ctx| {
//!     if ctx.is_cancelled() {
//!         return ItemOutcome::Cancelled(item.to_string());
//!     }
//!     ItemOutcome::Completed(item.to_string())
//! })?;
//! assert_eq!(report.progress.finished_tasks(), 10);
//! # Ok::<(), isocmd::engine::PoolError>(())
//! ```

pub mod batch;
pub mod cancel;
pub mod partition;
pub mod pool;
pub mod progress;
pub mod queue;

pub use batch::{BatchItem, BatchReport, BatchRunner, BatchSettings, ItemContext, ItemOutcome, OutcomeCounts, OutcomeSets};
pub use cancel::{CancellationToken, Cancelled};
pub use partition::{Chunk, DEFAULT_MAX_CHUNK_SIZE, Partitioner, calculate_optimal_workers};
pub use pool::{PoolError, TaskError, TaskHandle, WorkerPool};
pub use progress::{ProgressOptions, ProgressSnapshot, ProgressState, ProgressTracker, render_status};
pub use queue::LockFreeQueue;
