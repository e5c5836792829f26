use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{CommandContext, SelectionArgs, finish_batch};
use crate::ops::convert::{self, ConvertOptions};

#[derive(Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Write the ISO files here instead of next to each input
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

pub fn execute(args: ConvertArgs, ctx: &CommandContext) -> Result<()> {
    let inputs = args.selection.resolve(ctx)?;
    let options = ConvertOptions {
        extensions: ctx.config.convert.extensions.clone(),
        output_dir: args.output_dir,
        cancel_poll_sectors: ctx.config.convert.cancel_poll_sectors,
    };

    let report = convert::convert(&ctx.runner, inputs, &options)?;
    finish_batch(&ctx.output, &report)
}
