//! Configuration management for isocmd
//!
//! Settings are merged with figment from embedded defaults, user and
//! working-directory files, an explicit `--config` file and `ISOCMD_`
//! environment variables, then extracted into [`IsoConfig`].

pub mod core;
pub mod formats;

// Re-export main types for easier access
pub use core::{
    CliOverrides, ConfigStack, ConvertConfig, DatabaseConfig, EngineConfig, IsoConfig, MountConfig,
    SearchConfig, TransferConfig,
};
pub use formats::ConfigFormat;

use crate::engine::{BatchSettings, ProgressOptions, calculate_optimal_workers};
use std::time::Duration;

impl EngineConfig {
    /// Resolve the knobs into settings for a [`crate::engine::BatchRunner`].
    ///
    /// An explicit `max_threads` is used as given; image work is I/O bound, so
    /// it may exceed the CPU count.
    pub fn batch_settings(&self, quiet: bool) -> BatchSettings {
        let max_threads = if self.max_threads > 0 {
            self.max_threads
        } else {
            calculate_optimal_workers(self.thread_percentage)
        };
        BatchSettings {
            max_threads,
            max_chunk_size: self.max_chunk_size.max(1),
            progress: ProgressOptions {
                interval: Duration::from_millis(self.progress_interval_ms.max(1)),
                visible: self.show_progress && !quiet,
            },
        }
    }
}
