//! # isocmd
//!
//! Disk image commander: finds ISO images, loop-mounts them, converts
//! BIN/IMG/MDF/NRG images to ISO, and copies, moves, deletes or renames them.
//!
//! Every operation runs as a batch on the [`engine`]: a work-stealing pool of
//! OS threads fed by lock-free queues, with cooperative cancellation and a
//! live progress line.
//!
//! ## Quick Start
//!
//! ```bash
//! # Find images and remember them
//! isocmd search ~/Downloads --save
//!
//! # Convert the first three database entries
//! isocmd convert --db 1-3
//!
//! # Mount them under /mnt/iso_<name>
//! sudo isocmd mount --db 1-3
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod ops;
pub mod signal;

pub use cli::{Cli, Output};
pub use config::IsoConfig;

/// Result type alias for isocmd operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
