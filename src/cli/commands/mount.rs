use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use super::{CommandContext, SelectionArgs, finish_batch};
use crate::ops::mount::{SystemMounter, mount_images};

#[derive(Args)]
pub struct MountArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Directory that receives the iso_<name> mount points
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,
}

pub fn execute(args: MountArgs, ctx: &CommandContext) -> Result<()> {
    let images = args.selection.resolve(ctx)?;
    let base_dir = args
        .base_dir
        .unwrap_or_else(|| PathBuf::from(&ctx.config.mount.base_dir));

    let report = mount_images(&ctx.runner, images, &base_dir, Arc::new(SystemMounter))?;
    finish_batch(&ctx.output, &report)
}
