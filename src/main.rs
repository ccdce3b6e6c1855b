//! GridGate - unified CLI entrypoint.
//!
//! Usage:
//!   gridgate start --config config/gridgate.toml
//!   gridgate config validate --config config/gridgate.toml
//!   gridgate config show [--format json]
//!   gridgate config generate [--output config/gridgate.toml]

use anyhow::Result;
use clap::Parser;
use gridgate::cli::commands::{run_config, run_start_with_config};
use gridgate::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/gridgate.toml"));

    match cli.command {
        Commands::Start(_args) => run_start_with_config(&config_path).await,
        Commands::Config(args) => run_config(args),
    }
}
