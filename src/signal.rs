//! Ctrl-C adapter.
//!
//! The first interrupt sets the process cancellation token so running batches
//! wind down; a second one while the token is still set exits immediately.

use anyhow::{Context, Result};

use crate::engine::CancellationToken;

/// Exit status used when the user insists on stopping.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    Cancel,
    Exit,
}

/// What one interrupt does to `token`.
pub fn handle_interrupt(token: &CancellationToken) -> InterruptAction {
    if token.is_set() {
        InterruptAction::Exit
    } else {
        token.set();
        InterruptAction::Cancel
    }
}

/// Install the handler. Call once per process.
pub fn install_interrupt_handler(token: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || match handle_interrupt(&token) {
        InterruptAction::Cancel => {
            eprintln!("\nInterrupt received, finishing in-flight items (press Ctrl-C again to abort)...");
        }
        InterruptAction::Exit => {
            eprintln!("\nAborted.");
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
    })
    .context("Failed to set signal handler")
}
