//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
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
    Validate,
    /// Print configuration with defaults filled in.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Default config file used when `--config` is absent.
pub const DEFAULT_CONFIG_PATH: &str = "config/rudder.toml";

/// Run the config command against `config_path`, or the default path.
pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    let config = config_path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);
    match args.command {
        ConfigCommand::Validate => validate_config(&config),
        ConfigCommand::Show { format } => {
            println!("{}", render_config(&config, &format)?);
            Ok(())
        }
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    let config = Config::from_file(path)?;

    println!("✓ Configuration is valid");
    println!("  listen:  {}", config.server.listen);
    println!("  storage: {}", config.storage.driver);
    if config.server.insecure {
        println!("  ⚠ Warning: serving without TLS; certificate authentication is unavailable");
    }
    if config.cluster.tokens.is_empty() && config.cluster.basic_users.is_empty() {
        println!("  ⚠ Warning: no cluster tokens or basic users configured");
    }
    Ok(())
}

fn render_config(path: &Path, format: &str) -> Result<String> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    let config = Config::from_file(path)?;

    match format {
        "json" => Ok(serde_json::to_string_pretty(&config)?),
        "toml" => Ok(toml::to_string_pretty(&config)?),
        other => anyhow::bail!("unknown format: {} (expected toml or json)", other),
    }
}
