use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{CommandContext, SelectionArgs, finish_batch};
use crate::ops::transfer::{TransferMode, TransferOptions, transfer};

#[derive(Args)]
pub struct CopyArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Destination directory (repeat for several)
    #[arg(long = "to", value_name = "DIR", required = true)]
    pub destinations: Vec<PathBuf>,

    /// Replace files that already exist at the destination
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Args)]
pub struct MoveArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Destination directory
    #[arg(long = "to", value_name = "DIR")]
    pub destination: PathBuf,

    /// Replace files that already exist at the destination
    #[arg(long)]
    pub overwrite: bool,
}

fn options(mode: TransferMode, overwrite: bool, ctx: &CommandContext) -> TransferOptions {
    TransferOptions {
        mode,
        overwrite,
        buffer_size: ctx.config.transfer.buffer_size_kb.max(1) * 1024,
    }
}

pub fn execute_copy(args: CopyArgs, ctx: &CommandContext) -> Result<()> {
    let sources = args.selection.resolve(ctx)?;
    let report = transfer(
        &ctx.runner,
        &sources,
        &args.destinations,
        options(TransferMode::Copy, args.overwrite, ctx),
    )?;
    finish_batch(&ctx.output, &report)
}

pub fn execute_move(args: MoveArgs, ctx: &CommandContext) -> Result<()> {
    let sources = args.selection.resolve(ctx)?;
    let report = transfer(
        &ctx.runner,
        &sources,
        &[args.destination],
        options(TransferMode::Move, args.overwrite, ctx),
    )?;
    finish_batch(&ctx.output, &report)
}
