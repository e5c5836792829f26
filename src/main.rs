use anyhow::Result;
use clap::Parser;

use isocmd::Cli;
use isocmd::engine::CancellationToken;
use isocmd::signal::install_interrupt_handler;

fn main() -> Result<()> {
    let cli = Cli::parse();
    install_interrupt_handler(CancellationToken::process())?;
    cli.run()
}
