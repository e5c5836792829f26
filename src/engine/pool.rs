//! Work-stealing thread pool.
//!
//! Every worker owns one [`LockFreeQueue`]. Submissions are spread over the
//! queues; a worker that finds its own queue empty probes randomly chosen
//! peers before parking on a condition variable with a short timeout.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, TryRecvError};
use rand::Rng;
use thiserror::Error;

use super::queue::LockFreeQueue;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Longest time an idle worker sleeps before rechecking the queues.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Poll interval of [`WorkerPool::wait_all`] between condition-variable wakeups.
const DRAIN_WAIT: Duration = Duration::from_millis(50);

/// Upper bound on random steal probes per idle round.
const MAX_STEAL_PROBES: usize = 64;

/// Maximum randomized back-off between two steal probes, in microseconds.
const STEAL_BACKOFF_MICROS: u64 = 50;

/// Largest random offset added to the round-robin submission cursor.
const SUBMIT_SPREAD: usize = 4;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn any worker thread")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task body panicked; the payload message is preserved.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was dropped before it produced a result.
    #[error("task was dropped before completing")]
    Abandoned,
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Result handle of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, TaskError>>,
    finished: Arc<AtomicBool>,
}

/// Marks a task finished once its job is gone, whether it ran or was discarded.
struct FinishGuard(Arc<AtomicBool>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run and returns its result.
    pub fn wait(self) -> Result<T, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Alias of [`wait`](Self::wait).
    pub fn get(self) -> Result<T, TaskError> {
        self.wait()
    }

    /// Non-blocking probe: `None` while the task is still queued or running.
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Abandoned)),
        }
    }

    /// True once the task has run or was dropped, independent of whether the
    /// result was already taken with [`try_get`](Self::try_get).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

struct PoolInner {
    queues: Box<[LockFreeQueue<Job>]>,
    submit_cursor: AtomicUsize,
    active_tasks: AtomicUsize,
    pending_tasks: AtomicUsize,
    stop: AtomicBool,
    idle_lock: Mutex<()>,
    work_ready: Condvar,
    drain_lock: Mutex<()>,
    drained: Condvar,
}

impl PoolInner {
    fn all_queues_empty(&self) -> bool {
        self.queues.iter().all(LockFreeQueue::is_empty)
    }

    fn wake_one(&self) {
        let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.work_ready.notify_one();
    }

    fn wake_all(&self) {
        let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.work_ready.notify_all();
    }

    fn find_job(&self, worker_id: usize, rng: &mut impl Rng) -> Option<Job> {
        if let Some(job) = self.queues[worker_id].dequeue() {
            return Some(job);
        }

        let queue_count = self.queues.len();
        if queue_count < 2 {
            return None;
        }

        let probes = (queue_count / 2).clamp(1, MAX_STEAL_PROBES);
        for probe in 0..probes {
            // Pick a peer uniformly among the other queues.
            let offset = rng.random_range(1..queue_count);
            let victim = (worker_id + offset) % queue_count;
            if let Some(job) = self.queues[victim].steal() {
                tracing::trace!("worker {} stole a task from queue {}", worker_id, victim);
                return Some(job);
            }
            if probe + 1 < probes {
                thread::sleep(Duration::from_micros(rng.random_range(0..=STEAL_BACKOFF_MICROS)));
            }
        }
        None
    }

    fn execute(&self, worker_id: usize, job: Job) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::warn!(
                "worker {} recovered from a panicking task: {}",
                worker_id,
                panic_message(payload.as_ref())
            );
        }
        self.active_tasks.fetch_sub(1, Ordering::AcqRel);

        if self.pending_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.drain_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.drained.notify_all();
        }
    }

    fn run_worker(self: Arc<Self>, worker_id: usize) {
        let mut rng = rand::rng();
        tracing::trace!("worker {} started", worker_id);

        loop {
            if let Some(job) = self.find_job(worker_id, &mut rng) {
                self.execute(worker_id, job);
                continue;
            }

            if self.stop.load(Ordering::Acquire) && self.all_queues_empty() {
                break;
            }

            let guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if self.stop.load(Ordering::Acquire) || !self.all_queues_empty() {
                continue;
            }
            let _ = self
                .work_ready
                .wait_timeout(guard, IDLE_WAIT)
                .unwrap_or_else(PoisonError::into_inner);
        }

        tracing::trace!("worker {} exiting", worker_id);
    }
}

/// Fixed-size pool of OS threads with per-worker lock-free queues.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `num_threads` workers (at least one).
    ///
    /// Fails only if not a single worker thread could be spawned; if some
    /// later spawn fails, the pool runs with fewer threads and the orphaned
    /// queues are drained by stealing.
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        let num_threads = num_threads.max(1);
        let inner = Arc::new(PoolInner {
            queues: (0..num_threads)
                .map(|_| LockFreeQueue::for_threads(num_threads))
                .collect(),
            submit_cursor: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            pending_tasks: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            work_ready: Condvar::new(),
            drain_lock: Mutex::new(()),
            drained: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("isocmd-worker-{worker_id}"))
                .spawn(move || worker_inner.run_worker(worker_id));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) if workers.is_empty() => return Err(PoolError::Spawn(e)),
                Err(e) => {
                    tracing::warn!(
                        "could only start {} of {} worker threads: {}",
                        workers.len(),
                        num_threads,
                        e
                    );
                    break;
                }
            }
        }

        tracing::debug!("worker pool started with {} threads", workers.len());
        Ok(Self { inner, workers })
    }

    /// Number of queues (one per requested worker).
    pub fn num_threads(&self) -> usize {
        self.inner.queues.len()
    }

    /// Number of worker threads actually running.
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    /// Tasks currently executing on some worker.
    pub fn active_tasks(&self) -> usize {
        self.inner.active_tasks.load(Ordering::Acquire)
    }

    /// Queues a task and returns its handle without blocking.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let spread = SUBMIT_SPREAD.min(self.num_threads());
        let cursor = self.inner.submit_cursor.fetch_add(1, Ordering::Relaxed);
        let offset = rand::rng().random_range(0..spread);
        self.submit_to((cursor + offset) % self.num_threads(), task)
    }

    /// Queues a task on a specific worker queue (index taken modulo the pool size).
    pub fn submit_to<T, F>(&self, queue: usize, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let finished = Arc::new(AtomicBool::new(false));
        let guard = FinishGuard(Arc::clone(&finished));
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task)).map_err(TaskError::from_panic);
            let _ = tx.send(result);
            drop(guard);
        });

        self.inner.pending_tasks.fetch_add(1, Ordering::AcqRel);
        self.inner.queues[queue % self.num_threads()].enqueue(job);
        self.inner.wake_one();

        TaskHandle { rx, finished }
    }

    /// Blocks until every submitted task has finished running.
    pub fn wait_all(&self) {
        let mut guard = self.inner.drain_lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.inner.pending_tasks.load(Ordering::Acquire) > 0 {
            guard = self
                .inner
                .drained
                .wait_timeout(guard, DRAIN_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.wake_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("a worker thread terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_submit_returns_value() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool.submit(|| 21 * 2);
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_zero_threads_clamped_to_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.num_threads(), 1);
        assert_eq!(pool.live_workers(), 1);
        assert_eq!(pool.submit(|| "ok").wait(), Ok("ok"));
    }

    #[test]
    fn test_panic_is_surfaced_through_handle() {
        let pool = WorkerPool::new(2).unwrap();
        let failing = pool.submit(|| -> u32 { panic!("bad image") });
        let healthy = pool.submit(|| 5u32);

        assert_eq!(failing.wait(), Err(TaskError::Panicked("bad image".to_string())));
        assert_eq!(healthy.wait(), Ok(5));

        // Workers survive the panic.
        assert_eq!(pool.submit(|| 1).wait(), Ok(1));
    }

    #[test]
    fn test_wait_all_drains_everything() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.active_tasks(), 0);
    }

    #[test]
    fn test_wait_all_on_idle_pool_returns() {
        let pool = WorkerPool::new(3).unwrap();
        let start = Instant::now();
        pool.wait_all();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_try_get_and_is_finished() {
        let pool = WorkerPool::new(1).unwrap();
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let handle = pool.submit(move || {
            let _ = release_rx.recv();
            9
        });
        assert!(handle.try_get().is_none());
        assert!(!handle.is_finished());
        release_tx.send(()).unwrap();
        pool.wait_all();
        assert!(handle.is_finished());
        assert_eq!(handle.try_get(), Some(Ok(9)));
        // Taking the result does not turn the task back into a pending one.
        assert!(handle.is_finished());
        assert_eq!(handle.try_get(), Some(Err(TaskError::Abandoned)));
    }

    #[test]
    fn test_finish_guard_fires_for_discarded_job() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard = FinishGuard(Arc::clone(&finished));
        let job: Job = Box::new(move || drop(guard));
        assert!(!finished.load(Ordering::Acquire));
        drop(job);
        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_drop_runs_queued_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2).unwrap();
            for _ in 0..50 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
