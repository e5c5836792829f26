use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::Output;
use crate::config::{ConfigFormat, ConfigStack};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display current merged configuration
    Show {
        /// Output format: json, toml, yaml
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// List the configuration files consulted, lowest priority first
    Path,
}

pub fn execute(args: ConfigArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let stack = ConfigStack::load(custom_config)?;

    match args.command {
        ConfigCommand::Show { format } => {
            let format: ConfigFormat = format.parse()?;
            // Validate before printing so a bad value is reported, not echoed
            stack.extract()?;
            println!("{}", stack.export_config(format)?);
        }
        ConfigCommand::Path => {
            for file in stack.files() {
                let state = if file.is_file() { "found" } else { "missing" };
                println!("{} ({})", file.display(), state);
            }
            output.verbose("ISOCMD_* environment variables override every file (use __ between section and key)");
        }
    }

    Ok(())
}
