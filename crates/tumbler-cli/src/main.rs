//! tumblerctl
//!
//! Command-line tool that plans rolling-window rollups and applies them to a
//! ksqlDB server.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show the derived entities and their DDL without touching a server
//! tumblerctl plan bars.toml
//!
//! # Create everything, dependencies first
//! export TUMBLER_KSQL_URL=http://localhost:8088
//! tumblerctl apply bars.toml
//!
//! # Run the pipeline against an in-process engine
//! tumblerctl apply bars.toml --dry-run
//!
//! # List persistent queries
//! tumblerctl queries
//! ```
//!
//! ## Configuration
//!
//! Settings are read from `~/.tumbler/config.toml` (or `--config`), then
//! overridden by flags and environment variables:
//! - `TUMBLER_KSQL_URL`: ksqlDB server (default: http://localhost:8088)
//! - `TUMBLER_REST_PROXY_URL`: Kafka REST proxy for topic administration
//! - `RUST_LOG`: log filter (default: info)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod format;
mod query_file;

use config::{Config, OutputFormat};
use format::Formatter;

#[derive(Parser)]
#[command(name = "tumblerctl")]
#[command(about = "Plan and apply rolling-window rollups against ksqlDB", long_about = None)]
struct Cli {
    /// Config file (default: ~/.tumbler/config.toml)
    #[arg(short, long = "config", global = true)]
    config_file: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// ksqlDB server URL
    #[arg(long, global = true, env = "TUMBLER_KSQL_URL")]
    ksql_url: Option<String>,

    /// Kafka REST proxy URL
    #[arg(long, global = true, env = "TUMBLER_REST_PROXY_URL")]
    rest_proxy_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan queries and print the derived entities with their DDL
    Plan(commands::plan::PlanArgs),
    /// Create the derived entities of each query on the server
    Apply(commands::apply::ApplyArgs),
    /// List the server's persistent queries
    Queries,
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: commands::ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config_file.as_deref())?;
    if let Some(url) = cli.ksql_url {
        config.ksql_url = url;
    }
    if let Some(url) = cli.rest_proxy_url {
        config.rest_proxy_url = Some(url);
    }
    if let Some(format) = cli.format {
        config.output_format = format;
    }
    let formatter = Formatter::new(config.output_format, config.colored && !cli.no_color);

    match cli.command {
        Commands::Plan(args) => commands::plan::handle_plan(args, &formatter)?,
        Commands::Apply(args) => commands::apply::handle_apply(args, &config, &formatter).await?,
        Commands::Queries => commands::queries::handle_queries(&config, &formatter).await?,
        Commands::Config { command } => {
            commands::handle_config_command(command, cli.config_file, &config, &formatter)?
        }
    }

    Ok(())
}
