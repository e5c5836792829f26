use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use console::style;
use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};

/// Batch counters shared between task bodies and the display thread
#[derive(Debug, Default)]
pub struct ProgressState {
    completed_bytes: AtomicU64,
    total_bytes: AtomicU64,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    recorded_tasks: AtomicUsize,
    total_tasks: AtomicUsize,
    processing_complete: AtomicBool,
}

impl ProgressState {
    /// `total_bytes` is 0 when the operation is not size-denominated.
    pub fn new(total_bytes: u64, total_tasks: usize) -> Self {
        Self {
            total_bytes: AtomicU64::new(total_bytes),
            total_tasks: AtomicUsize::new(total_tasks),
            ..Self::default()
        }
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.completed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records one successful (or skipped) item. Returns false once every task is accounted for.
    pub fn record_completed(&self) -> bool {
        self.reserve_slot() && {
            self.completed_tasks.fetch_add(1, Ordering::AcqRel);
            true
        }
    }

    /// Records one failed or cancelled item. Returns false once every task is accounted for.
    pub fn record_failed(&self) -> bool {
        self.reserve_slot() && {
            self.failed_tasks.fetch_add(1, Ordering::AcqRel);
            true
        }
    }

    // completed + failed can never exceed total
    fn reserve_slot(&self) -> bool {
        let total = self.total_tasks.load(Ordering::Acquire);
        self.recorded_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |recorded| {
                (recorded < total).then_some(recorded + 1)
            })
            .is_ok()
    }

    pub fn mark_complete(&self) {
        self.processing_complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.processing_complete.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_bytes: self.completed_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Acquire),
            failed_tasks: self.failed_tasks.load(Ordering::Acquire),
            total_tasks: self.total_tasks.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed_bytes: u64,
    pub total_bytes: u64,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tasks: usize,
}

impl ProgressSnapshot {
    pub fn finished_tasks(&self) -> usize {
        self.completed_tasks + self.failed_tasks
    }

    /// Byte percentage when the batch is size-denominated, task percentage otherwise.
    pub fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.completed_bytes.min(self.total_bytes) as f64 / self.total_bytes as f64) * 100.0
        } else if self.total_tasks > 0 {
            (self.finished_tasks() as f64 / self.total_tasks as f64) * 100.0
        } else {
            100.0
        }
    }
}

/// Renders the one-line status shown while a batch runs.
pub fn render_status(label: &str, snapshot: &ProgressSnapshot) -> String {
    let tasks = format!(
        "{} {} {} {} / {}",
        style("✔").green(),
        style(snapshot.completed_tasks).green(),
        style("✖").red(),
        style(snapshot.failed_tasks).red(),
        snapshot.total_tasks
    );

    if snapshot.total_bytes > 0 {
        format!(
            "{label}: {} / {} ({:.1}%) | {tasks}",
            format_size(snapshot.completed_bytes, BINARY),
            format_size(snapshot.total_bytes, BINARY),
            snapshot.percent()
        )
    } else {
        format!("{label}: {tasks} ({:.1}%)", snapshot.percent())
    }
}

/// Display settings for a [`ProgressTracker`]
#[derive(Debug, Clone)]
pub struct ProgressOptions {
    pub interval: Duration,
    pub visible: bool,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            visible: true,
        }
    }
}

/// Owns the counters of one batch plus the thread that renders them.
pub struct ProgressTracker {
    state: Arc<ProgressState>,
    display: Option<JoinHandle<()>>,
}

impl ProgressTracker {
    /// Creates the counters and starts the display thread.
    pub fn start(label: &str, total_bytes: u64, total_tasks: usize, options: &ProgressOptions) -> Self {
        let state = Arc::new(ProgressState::new(total_bytes, total_tasks));
        let bar = Self::create_bar(total_tasks, options.visible);

        let display_state = Arc::clone(&state);
        let label = label.to_string();
        let interval = options.interval;
        let spawned = thread::Builder::new()
            .name("isocmd-progress".to_string())
            .spawn(move || {
                loop {
                    let snapshot = display_state.snapshot();
                    bar.set_position(snapshot.finished_tasks() as u64);
                    bar.set_message(render_status(&label, &snapshot));
                    if display_state.is_complete() {
                        break;
                    }
                    thread::park_timeout(interval);
                }
                bar.finish_and_clear();
            });

        let display = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("progress display unavailable: {}", e);
                None
            }
        };

        Self { state, display }
    }

    fn create_bar(total_tasks: usize, visible: bool) -> ProgressBar {
        if !visible {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total_tasks as u64);
        match ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:30.cyan/blue} {msg}") {
            Ok(style) => bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  ")),
            Err(e) => tracing::debug!("falling back to default progress style: {}", e),
        }
        bar
    }

    pub fn state(&self) -> Arc<ProgressState> {
        Arc::clone(&self.state)
    }

    /// Flags the batch as complete, joins the display thread and returns the final counters.
    pub fn finish(mut self) -> ProgressSnapshot {
        self.stop_display();
        self.state.snapshot()
    }

    fn stop_display(&mut self) {
        self.state.mark_complete();
        if let Some(handle) = self.display.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!("progress display thread panicked");
            }
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop_display();
    }
}
