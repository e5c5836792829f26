//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a cheap, clonable handle to one shared flag.
//! The orchestrator resets it at the start of every batch, the interrupt
//! adapter sets it, and task bodies poll it. The engine itself never sets it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use thiserror::Error;

lazy_static! {
    static ref PROCESS_TOKEN: CancellationToken = CancellationToken::new();
}

/// Returned by task bodies that stopped early because the token was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an independent token, initially not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The token shared by the whole process and wired to the interrupt handler.
    pub fn process() -> Self {
        PROCESS_TOKEN.clone()
    }

    /// Clears the flag. Called once per batch before any work is submitted.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Requests cancellation of all work polling this token.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the token is set, for use with `?` inside loops.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_set() { Err(Cancelled) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_set_and_reset() {
        let token = CancellationToken::new();
        assert!(!token.is_set());
        assert_eq!(token.check(), Ok(()));

        token.set();
        assert!(token.is_set());
        assert_eq!(token.check(), Err(Cancelled));

        token.reset();
        assert!(!token.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.set();
        assert!(token.is_set());

        let unrelated = CancellationToken::new();
        assert!(!unrelated.is_set());
    }

    #[test]
    fn test_process_token_is_shared() {
        let a = CancellationToken::process();
        let b = CancellationToken::process();
        assert!(Arc::ptr_eq(&a.flag, &b.flag));
    }

    #[test]
    fn test_spinning_task_stops_after_cancel() {
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let worker = thread::spawn(move || {
            while !worker_token.is_set() {
                std::hint::spin_loop();
            }
            Instant::now()
        });

        thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        token.set();

        let stopped_at = worker.join().unwrap();
        assert!(stopped_at.duration_since(cancelled_at) < Duration::from_millis(200));
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(Cancelled.to_string(), "operation cancelled");
    }
}
