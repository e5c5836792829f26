use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use crate::cli::Output;
use crate::config::{CliOverrides, ConfigStack, IsoConfig};
use crate::engine::{BatchReport, BatchRunner, CancellationToken};
use crate::ops::database::ImageDatabase;
use crate::ops::selection;

pub mod config;
pub mod convert;
pub mod delete;
pub mod list;
pub mod mount;
pub mod rename;
pub mod search;
pub mod transfer;
pub mod unmount;

#[derive(Parser)]
#[command(
    name = "isocmd",
    version = env!("CARGO_PKG_VERSION"),
    about = "Search, mount, convert and bulk-manage disk images",
    long_about = "isocmd finds ISO images, loop-mounts them, converts BIN/IMG/MDF/NRG images to ISO \
                  and copies, moves, deletes or renames them in parallel batches."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    /// Maximum number of worker threads
    #[arg(long, global = true, value_name = "N")]
    pub threads: Option<usize>,

    /// Do not draw the progress line
    #[arg(long, global = true)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search directories for images
    Search(search::SearchArgs),
    /// Show the image database
    List(list::ListArgs),
    /// Loop-mount images
    Mount(mount::MountArgs),
    /// Unmount images and remove their mount directories
    Unmount(unmount::UnmountArgs),
    /// Convert BIN/IMG/MDF/NRG images to ISO
    Convert(convert::ConvertArgs),
    /// Copy images to one or more directories
    Copy(transfer::CopyArgs),
    /// Move images to a directory
    Move(transfer::MoveArgs),
    /// Delete images
    Delete(delete::DeleteArgs),
    /// Change the case of file names
    Rename(rename::RenameArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

/// Everything a batch command needs
pub struct CommandContext {
    pub config: IsoConfig,
    pub output: Output,
    pub runner: BatchRunner,
}

impl CommandContext {
    pub fn database(&self) -> ImageDatabase {
        ImageDatabase::new(self.config.database.resolved_path())
    }
}

/// Image paths given on the command line and/or picked from the database.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Paths to operate on
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Pick database entries by number, e.g. "1-3,5 7" (see `isocmd list`)
    #[arg(long = "db", value_name = "SEL")]
    pub db: Option<String>,
}

impl SelectionArgs {
    pub fn resolve(&self, ctx: &CommandContext) -> Result<Vec<PathBuf>> {
        let mut paths = self.paths.clone();
        if let Some(expr) = &self.db {
            let entries = ctx.database().load()?;
            if entries.is_empty() {
                bail!("The image database is empty; run `isocmd search --save` first");
            }
            paths.extend(selection::select(&entries, expr)?);
        }
        if paths.is_empty() {
            bail!("Nothing selected: pass paths or --db SEL");
        }
        Ok(paths)
    }
}

/// Print the summary and turn failures into a non-zero exit status.
pub fn finish_batch(output: &Output, report: &BatchReport) -> Result<()> {
    output.batch_summary(report);
    let failed = report.unfinished();
    if failed > 0 {
        bail!("{}: {} item(s) did not complete", report.label, failed);
    }
    Ok(())
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let Cli {
            verbose,
            quiet,
            config: config_path,
            threads,
            no_progress,
            command,
        } = self;

        // Set up logging based on verbosity
        setup_logging(verbose, quiet);

        let output = Output::new(verbose > 0, quiet);

        let command = match command {
            Commands::Config(args) => return config::execute(args, config_path.as_deref(), &output),
            other => other,
        };

        let stack = ConfigStack::load(config_path.as_deref())?;
        let mut config = stack.extract()?;
        config.apply_overrides(&CliOverrides { threads, no_progress });
        tracing::debug!("effective engine config: {:?}", config.engine);

        let runner = BatchRunner::new(config.engine.batch_settings(quiet), CancellationToken::process());
        let ctx = CommandContext { config, output, runner };

        match command {
            Commands::Search(args) => search::execute(args, &ctx),
            Commands::List(args) => list::execute(args, &ctx),
            Commands::Mount(args) => mount::execute(args, &ctx),
            Commands::Unmount(args) => unmount::execute(args, &ctx),
            Commands::Convert(args) => convert::execute(args, &ctx),
            Commands::Copy(args) => transfer::execute_copy(args, &ctx),
            Commands::Move(args) => transfer::execute_move(args, &ctx),
            Commands::Delete(args) => delete::execute(args, &ctx),
            Commands::Rename(args) => rename::execute(args, &ctx),
            Commands::Config(_) => Ok(()),
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // Keep the directory walker quiet below -vvv
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => tracing_subscriber::EnvFilter::new("warn"),
        1 => tracing_subscriber::EnvFilter::new("info,ignore=warn,globset=warn"),
        2 => tracing_subscriber::EnvFilter::new("debug,ignore=warn,globset=warn"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["isocmd", "copy", "a.iso", "--to", "/tmp/x", "--threads", "3", "-vv"]).unwrap();
        assert_eq!(cli.threads, Some(3));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Copy(_)));
    }

    #[test]
    fn test_selection_requires_input() {
        let ctx = CommandContext {
            config: IsoConfig::default(),
            output: Output::new(false, true),
            runner: BatchRunner::new(Default::default(), CancellationToken::new()),
        };
        assert!(SelectionArgs::default().resolve(&ctx).is_err());

        let args = SelectionArgs {
            paths: vec![PathBuf::from("a.iso")],
            db: None,
        };
        assert_eq!(args.resolve(&ctx).unwrap(), vec![PathBuf::from("a.iso")]);
    }
}
