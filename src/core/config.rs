//! Configuration parsing and validation.
//!
//! Rudder configuration is loaded from TOML files with CLI overrides.
//! Settings belonging to a storage driver or object store provider that
//! is not selected are ignored, never validated.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Top-level Rudder configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// gRPC listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Cluster connection configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Release storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// gRPC listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// TLS certificate chain path.
    #[serde(default)]
    pub tls_chain_path: Option<String>,

    /// TLS private key path.
    #[serde(default)]
    pub tls_key_path: Option<String>,

    /// CA used to verify client certificates.
    #[serde(default)]
    pub client_ca_path: Option<String>,

    /// Serve plaintext. Certificate authentication is unavailable.
    #[serde(default)]
    pub insecure: bool,

    /// Upper bound on a single credential verification, in milliseconds.
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Largest accepted request message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tls_chain_path: None,
            tls_key_path: None,
            client_ca_path: None,
            insecure: false,
            auth_timeout_ms: default_auth_timeout_ms(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// In-process cluster configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Bearer tokens accepted by the cluster.
    #[serde(default)]
    pub tokens: Vec<LocalToken>,

    /// Basic credentials accepted by the cluster.
    #[serde(default)]
    pub basic_users: Vec<LocalBasicUser>,
}

/// Local cluster bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalToken {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Local cluster basic credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBasicUser {
    pub username: String,
    pub password: String,
}

/// Release storage configuration.
///
/// Provider settings are flat; only those of the selected provider are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver: "memory", "config-object", "custom-resource" or "object-store".
    #[serde(default = "default_storage_driver")]
    pub driver: String,

    /// Object store provider: "s3", "google", "azure", "swift" or "memory".
    #[serde(default)]
    pub provider: Option<String>,

    /// Bucket or container for release bodies.
    #[serde(default)]
    pub container: Option<String>,

    /// Key prefix for release bodies.
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub s3_access_key_id: Option<String>,
    #[serde(default)]
    pub s3_secret_key: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,

    #[serde(default)]
    pub gcs_json_key_path: Option<String>,
    #[serde(default)]
    pub gcs_project_id: Option<String>,

    #[serde(default)]
    pub azure_account: Option<String>,
    #[serde(default)]
    pub azure_key: Option<String>,

    #[serde(default)]
    pub swift_key: Option<String>,
    #[serde(default)]
    pub swift_tenant_auth_url: Option<String>,
    #[serde(default)]
    pub swift_tenant_name: Option<String>,
    #[serde(default)]
    pub swift_username: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: default_storage_driver(),
            provider: None,
            container: None,
            prefix: None,
            s3_access_key_id: None,
            s3_secret_key: None,
            s3_endpoint: None,
            s3_region: None,
            gcs_json_key_path: None,
            gcs_project_id: None,
            azure_account: None,
            azure_key: None,
            swift_key: None,
            swift_tenant_auth_url: None,
            swift_tenant_name: None,
            swift_username: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_listen() -> String {
    "0.0.0.0:44134".to_string()
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

fn default_storage_driver() -> String {
    "memory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage drivers accepted in `storage.driver`.
pub const STORAGE_DRIVERS: [&str; 4] = ["memory", "config-object", "custom-resource", "object-store"];

/// Providers accepted in `storage.provider`.
pub const OBJECT_STORE_PROVIDERS: [&str; 5] = ["s3", "google", "azure", "swift", "memory"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref listen) = overrides.listen {
            self.server.listen = listen.clone();
        }
        if let Some(ref driver) = overrides.storage_driver {
            self.storage.driver = driver.clone();
        }
        if overrides.insecure {
            self.server.insecure = true;
        }
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("invalid server.listen address: {}", self.server.listen))
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_cluster()?;
        self.validate_storage()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        self.listen_addr()?;

        match (&self.server.tls_chain_path, &self.server.tls_key_path) {
            (Some(_), None) => {
                anyhow::bail!("server.tls_key_path required when tls_chain_path is set");
            }
            (None, Some(_)) => {
                anyhow::bail!("server.tls_chain_path required when tls_key_path is set");
            }
            (None, None) if !self.server.insecure => {
                anyhow::bail!(
                    "server.tls_chain_path and server.tls_key_path required unless server.insecure = true"
                );
            }
            _ => {}
        }

        if self.server.client_ca_path.is_some() && self.server.tls_chain_path.is_none() {
            anyhow::bail!("server.client_ca_path requires TLS");
        }
        if self.server.auth_timeout_ms == 0 {
            anyhow::bail!("server.auth_timeout_ms must be > 0");
        }
        if self.server.max_message_size == 0 {
            anyhow::bail!("server.max_message_size must be > 0");
        }
        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        for (i, entry) in self.cluster.tokens.iter().enumerate() {
            if entry.token.is_empty() || entry.username.is_empty() {
                anyhow::bail!("cluster.tokens[{}] requires token and username", i);
            }
        }
        for (i, entry) in self.cluster.basic_users.iter().enumerate() {
            if entry.username.is_empty() || entry.password.is_empty() {
                anyhow::bail!("cluster.basic_users[{}] requires username and password", i);
            }
        }
        Ok(())
    }

    fn validate_storage(&self) -> Result<()> {
        if !STORAGE_DRIVERS.contains(&self.storage.driver.as_str()) {
            anyhow::bail!(
                "storage.driver must be one of {:?}, got: {}",
                STORAGE_DRIVERS,
                self.storage.driver
            );
        }
        if self.storage.driver != "object-store" {
            return Ok(());
        }

        let provider = match self.storage.provider.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => anyhow::bail!("storage.provider required for the object-store driver"),
        };
        if !OBJECT_STORE_PROVIDERS.contains(&provider) {
            anyhow::bail!(
                "storage.provider must be one of {:?}, got: {}",
                OBJECT_STORE_PROVIDERS,
                provider
            );
        }
        let has_container = self
            .storage
            .container
            .as_deref()
            .is_some_and(|c| !c.is_empty());
        if provider != "memory" && !has_container {
            anyhow::bail!("storage.container required for the object-store driver");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override listen address.
    pub listen: Option<String>,
    /// Override storage driver.
    pub storage_driver: Option<String>,
    /// Force plaintext serving.
    pub insecure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[server]
insecure = true
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:44134");
        assert_eq!(config.server.max_message_size, 10 * 1024 * 1024);
        assert!(config.cluster.tokens.is_empty());
        assert_eq!(config.storage.driver, "memory");
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_tls_required_unless_insecure() {
        let err = Config::from_toml("").unwrap_err();
        assert!(format!("{:#}", err).contains("insecure"));

        let err = Config::from_toml(
            r#"
[server]
tls_chain_path = "/tmp/tls.crt"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("tls_key_path"));
    }

    #[test]
    fn test_unselected_provider_fields_ignored() {
        let config = Config::from_toml(
            r#"
[server]
insecure = true

[storage]
driver = "custom-resource"
provider = "nonsense"
s3_region = "us-east-1"
"#,
        )
        .unwrap();
        assert_eq!(config.storage.driver, "custom-resource");
    }

    #[test]
    fn test_object_store_requires_provider_and_container() {
        let base = "[server]\ninsecure = true\n[storage]\ndriver = \"object-store\"\n";
        assert!(Config::from_toml(base).is_err());
        assert!(Config::from_toml(&format!("{}provider = \"ftp\"\n", base)).is_err());
        assert!(Config::from_toml(&format!("{}provider = \"s3\"\n", base)).is_err());
        assert!(
            Config::from_toml(&format!("{}provider = \"s3\"\ncontainer = \"releases\"\n", base))
                .is_ok()
        );
        assert!(Config::from_toml(&format!("{}provider = \"memory\"\n", base)).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            "[server]\ninsecure = true\nlisten = \"nowhere\"\n",
            "[server]\ninsecure = true\nauth_timeout_ms = 0\n",
            "[server]\ninsecure = true\n[[cluster.tokens]]\ntoken = \"\"\nusername = \"a\"\n",
            "[server]\ninsecure = true\n[storage]\ndriver = \"sqlite\"\n",
            "[server]\ninsecure = true\n[telemetry]\nlog_level = \"loud\"\n",
        ];
        for case in cases {
            assert!(Config::from_toml(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides {
            log_level: Some("debug".to_string()),
            listen: Some("127.0.0.1:0".to_string()),
            storage_driver: Some("config-object".to_string()),
            insecure: true,
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.driver, "config-object");
        assert_eq!(config.listen_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rudder.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(Config::from_file(&path).is_ok());
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
