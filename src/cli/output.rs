//! Terminal output for isocmd
//!
//! Consistent styled messages plus the end-of-batch summary every command prints.

use console::style;
use humansize::{BINARY, format_size};

use crate::engine::BatchReport;

/// Output handler for consistent CLI formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    verbose: bool,
    quiet: bool,
}

impl Output {
    /// Create a new output handler
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("ℹ").blue(), message);
        }
    }

    /// Print a verbose message (only if verbose mode is enabled)
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", style("ℹ").dim(), style(message).dim());
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Print a list item
    pub fn list_item(&self, item: &str) {
        if !self.quiet {
            println!("  • {}", item);
        }
    }

    /// Print a numbered entry, right-aligned to `width`
    pub fn numbered(&self, index: usize, width: usize, item: &str) {
        if !self.quiet {
            println!("  {:>width$}  {}", style(index).cyan(), item, width = width);
        }
    }

    /// Print the outcome of one batch.
    ///
    /// Failures and cancellations are always listed, skips unless quiet,
    /// completions only in verbose mode.
    pub fn batch_summary(&self, report: &BatchReport) {
        let outcomes = &report.outcomes;

        if self.verbose {
            for message in &outcomes.completed {
                self.verbose(message);
            }
        }
        if !self.quiet {
            for message in &outcomes.skipped {
                println!("  {} {}", style("↷").yellow(), style(message).dim());
            }
        }
        for message in &outcomes.failed {
            eprintln!("  {} {}", style("✖").red(), message);
        }
        for message in &outcomes.cancelled {
            eprintln!("  {} {}", style("⊘").magenta(), message);
        }

        if self.quiet {
            return;
        }

        let counts = &outcomes.counts;
        let mut line = format!(
            "{}: {} completed, {} skipped, {} failed",
            report.label,
            style(counts.completed).green().bold(),
            style(counts.skipped).yellow(),
            style(counts.failed).red()
        );
        if counts.cancelled > 0 {
            line.push_str(&format!(", {} cancelled", style(counts.cancelled).magenta()));
        }
        if report.progress.total_bytes > 0 {
            line.push_str(&format!(
                " ({} in {:.1}s)",
                format_size(report.progress.completed_bytes, BINARY),
                report.elapsed.as_secs_f64()
            ));
        }

        if report.has_failures() || report.was_cancelled() {
            println!("{} {}", style("⚠").yellow(), line);
        } else {
            println!("{} {}", style("✔").green(), line);
        }
    }
}
