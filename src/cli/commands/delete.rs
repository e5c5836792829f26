use anyhow::Result;
use clap::Args;

use super::{CommandContext, SelectionArgs, finish_batch};
use crate::ops::transfer;

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Also delete directories and their contents
    #[arg(short, long)]
    pub recursive: bool,
}

pub fn execute(args: DeleteArgs, ctx: &CommandContext) -> Result<()> {
    let paths = args.selection.resolve(ctx)?;
    let report = transfer::delete(&ctx.runner, paths, args.recursive)?;
    finish_batch(&ctx.output, &report)
}
