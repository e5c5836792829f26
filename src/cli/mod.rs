//! Command-line interface for isocmd
//!
//! clap-derived commands, each in its own module with an `execute` function,
//! plus the shared output helper.

pub mod commands;
pub mod output;

pub use commands::Cli;
pub use output::Output;
