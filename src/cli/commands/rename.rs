use anyhow::Result;
use clap::Args;

use super::{CommandContext, SelectionArgs, finish_batch};
use crate::ops::rename::{CaseMode, rename_all};

#[derive(Args)]
pub struct RenameArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Case to apply to each file name
    #[arg(long = "case", value_enum, default_value_t = CaseMode::Lower)]
    pub mode: CaseMode,
}

pub fn execute(args: RenameArgs, ctx: &CommandContext) -> Result<()> {
    let paths = args.selection.resolve(ctx)?;
    let report = rename_all(&ctx.runner, paths, args.mode)?;
    finish_batch(&ctx.output, &report)
}
