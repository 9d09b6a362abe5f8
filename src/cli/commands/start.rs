//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the release gateway.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Listen address, overriding `server.listen`.
    #[arg(long)]
    pub listen: Option<String>,

    /// Storage driver, overriding `storage.driver`.
    #[arg(long)]
    pub storage: Option<String>,

    /// Serve without TLS.
    #[arg(long)]
    pub insecure: bool,
}

impl StartArgs {
    fn overrides(&self, log_level: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            log_level,
            listen: self.listen.clone(),
            storage_driver: self.storage.clone(),
            insecure: self.insecure,
        }
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Load `path` (or defaults when it is absent) and apply overrides.
///
/// Validation runs after overrides so `--insecure` can complete a config
/// that lacks TLS settings.
fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config: Config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "failed to parse config file")?
        }
        None => Config::default(),
    };
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

/// Run the start command.
pub async fn run_start(
    args: StartArgs,
    config_path: Option<&Path>,
    log_level: Option<String>,
) -> Result<()> {
    let config = load_config(config_path, &args.overrides(log_level))?;
    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
