use anyhow::Result;
use clap::Args;

use super::CommandContext;

#[derive(Args)]
pub struct ListArgs {
    /// Drop entries whose file no longer exists
    #[arg(long)]
    pub prune: bool,

    /// Empty the database
    #[arg(long, conflicts_with = "prune")]
    pub clear: bool,
}

pub fn execute(args: ListArgs, ctx: &CommandContext) -> Result<()> {
    let database = ctx.database();

    if args.clear {
        database.clear()?;
        ctx.output.success("Image database cleared");
        return Ok(());
    }
    if args.prune {
        let removed = database.prune()?;
        ctx.output.success(&format!("Removed {} stale entr{}", removed, if removed == 1 { "y" } else { "ies" }));
    }

    let entries = database.load()?;
    if entries.is_empty() {
        ctx.output.info(&format!("No images in {}", database.path().display()));
        return Ok(());
    }

    let width = entries.len().to_string().len();
    for (i, entry) in entries.iter().enumerate() {
        if ctx.output.is_quiet() {
            println!("{}\t{}", i + 1, entry.display());
        } else {
            ctx.output.numbered(i + 1, width, &entry.display().to_string());
        }
    }
    Ok(())
}
