use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;

use super::{CommandContext, finish_batch};
use crate::ops::mount::{SystemMounter, mount_dirs, resolve_unmount_target, unmount_targets};
use crate::ops::selection;

#[derive(Args)]
pub struct UnmountArgs {
    /// Mount points, or images whose mount point should be released
    #[arg(value_name = "PATH")]
    pub targets: Vec<PathBuf>,

    /// Pick database entries by number
    #[arg(long = "db", value_name = "SEL")]
    pub db: Option<String>,

    /// Unmount every iso_* directory under the base directory
    #[arg(long, conflicts_with_all = ["targets", "db"])]
    pub all: bool,

    /// Directory holding the iso_<name> mount points
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,
}

pub fn execute(args: UnmountArgs, ctx: &CommandContext) -> Result<()> {
    let base_dir = args
        .base_dir
        .unwrap_or_else(|| PathBuf::from(&ctx.config.mount.base_dir));

    let mount_points: Vec<PathBuf> = if args.all {
        mount_dirs(&base_dir)
    } else {
        let mut targets = args.targets;
        if let Some(expr) = &args.db {
            targets.extend(selection::select(&ctx.database().load()?, expr)?);
        }
        if targets.is_empty() {
            bail!("Nothing selected: pass mount points, images, --db SEL or --all");
        }
        targets
            .iter()
            .filter_map(|target| resolve_unmount_target(&base_dir, target))
            .collect()
    };

    if mount_points.is_empty() {
        ctx.output.info(&format!("Nothing mounted under {}", base_dir.display()));
        return Ok(());
    }

    let report = unmount_targets(&ctx.runner, mount_points, Arc::new(SystemMounter))?;
    finish_batch(&ctx.output, &report)
}
