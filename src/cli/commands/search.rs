use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{CommandContext, finish_batch};
use crate::ops::search::{self, SearchOptions};

#[derive(Args)]
pub struct SearchArgs {
    /// Directories (or files) to search
    #[arg(value_name = "DIR", required = true)]
    pub roots: Vec<PathBuf>,

    /// File extensions to look for (overrides the configured list)
    #[arg(long, value_delimiter = ',', value_name = "EXT")]
    pub ext: Vec<String>,

    /// Follow symbolic links
    #[arg(long)]
    pub follow_links: bool,

    /// Maximum depth below each root (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Add the hits to the image database
    #[arg(long)]
    pub save: bool,
}

pub fn execute(args: SearchArgs, ctx: &CommandContext) -> Result<()> {
    let mut options = SearchOptions::from(&ctx.config.search);
    if !args.ext.is_empty() {
        options.extensions = args.ext;
    }
    options.follow_links |= args.follow_links;
    if let Some(depth) = args.max_depth {
        options.max_depth = depth;
    }

    let result = search::search(&ctx.runner, &args.roots, &options)?;

    for hit in &result.hits {
        if ctx.output.is_quiet() {
            println!("{}", hit.display());
        } else {
            ctx.output.list_item(&hit.display().to_string());
        }
    }
    ctx.output.info(&format!("{} image(s) found", result.hits.len()));

    if args.save && !result.hits.is_empty() {
        let database = ctx.database();
        let added = database.merge(result.hits.iter().cloned())?;
        ctx.output.success(&format!(
            "{} new entr{} saved to {}",
            added,
            if added == 1 { "y" } else { "ies" },
            database.path().display()
        ));
    }

    finish_batch(&ctx.output, &result.report)
}
