//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/gridgate.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/gridgate.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    println!("✓ {} is valid", path.display());
    println!("  listener.bind = {}", config.listener.bind);
    println!(
        "  proxy.transfer_threshold = {}",
        config.proxy.transfer_threshold
    );
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = if path.exists() {
        Config::from_file(path)?
    } else {
        Config::default()
    };
    let rendered = match format {
        "toml" => toml::to_string_pretty(&config).context("failed to render config as TOML")?,
        "json" => {
            serde_json::to_string_pretty(&config).context("failed to render config as JSON")?
        }
        other => anyhow::bail!("unknown output format {other:?}, expected toml or json"),
    };
    println!("{rendered}");
    Ok(())
}

fn generate_config(output: Option<&Path>) -> Result<()> {
    let template =
        toml::to_string_pretty(&Config::default()).context("failed to render config template")?;
    match output {
        Some(path) => {
            std::fs::write(path, &template)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => println!("{template}"),
    }
    Ok(())
}
