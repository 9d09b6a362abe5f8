//! Rudder - unified CLI entrypoint.
//!
//! Usage:
//!   rudder start --config config/rudder.toml
//!   rudder start --insecure --storage config-object
//!   rudder config validate --config config/rudder.toml
//!   rudder config show --config config/rudder.toml --format json

use anyhow::Result;
use clap::Parser;
use rudder::cli::commands::{run_config, run_start};
use rudder::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Start(args) => run_start(args, config_path.as_deref(), cli.log_level).await,
        Commands::Config(args) => run_config(args, config_path.as_deref()),
    }
}
