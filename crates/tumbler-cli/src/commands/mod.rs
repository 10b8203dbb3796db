//! Command handlers for tumblerctl
//!
//! - Plan: offline planning and DDL rendering
//! - Apply: pipeline initialization against a server or the in-process engine
//! - Queries: persistent query listing
//! - Config: show and initialize the config file

pub mod apply;
pub mod plan;
pub mod queries;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;
use crate::format::Formatter;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(
    command: ConfigCommands,
    path: Option<PathBuf>,
    config: &Config,
    formatter: &Formatter,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            if formatter.is_json() {
                formatter.print_json(config)?;
            } else {
                print!("{}", toml::to_string_pretty(config)?);
            }
        }
        ConfigCommands::Init { force } => {
            let path = path.unwrap_or_else(Config::config_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.save_to(&path)?;
            formatter.print_success(&format!("Wrote {}", path.display()));
        }
    }
    Ok(())
}
