//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: cluster → storage → gateway → listener
//! - Shutdown order: listener → gateway → storage
//!
//! Any failure before the listener is up aborts startup; the process
//! never serves with a half-initialized store.

use crate::auth::Authenticator;
use crate::cluster::{ClusterClient, LocalCluster, UserInfo};
use crate::core::config::Config;
use crate::core::error::RudderResult;
use crate::core::namespace::namespace_from_env;
use crate::gateway::{AuthGateway, GatewayServer, ReleaseServer, ReleaseService};
use crate::net::tls::{server_tls_config, TlsConfig};
use crate::ops::version::VersionInfo;
use crate::storage::{Storage, StorageFactory, StoreOptions};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    pub cluster: ComponentHealth,
    pub storage: ComponentHealth,
    pub gateway: ComponentHealth,
    pub listener: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            cluster: ComponentHealth::Starting,
            storage: ComponentHealth::Starting,
            gateway: ComponentHealth::Starting,
            listener: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        [self.cluster, self.storage, self.gateway, self.listener]
            .iter()
            .all(|h| *h == ComponentHealth::Healthy)
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        ![self.cluster, self.storage, self.gateway, self.listener].contains(&ComponentHealth::Failed)
    }
}

/// Rudder runtime holding all component handles.
pub struct Runtime {
    config: Arc<Config>,

    /// Namespace all releases live in, resolved once.
    namespace: String,

    cluster: Option<Arc<LocalCluster>>,
    storage: Option<Storage>,
    gateway: Option<AuthGateway>,

    health: RuntimeHealth,
    running: Arc<AtomicBool>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    server_handle: Option<JoinHandle<RudderResult<()>>>,
}

impl Runtime {
    /// Create a runtime; the namespace is resolved from the environment.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_namespace(config, namespace_from_env())
    }

    /// Create a runtime bound to an explicit namespace.
    pub fn with_namespace(config: Config, namespace: impl Into<String>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            namespace: namespace.into(),
            cluster: None,
            storage: None,
            gateway: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            server_handle: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Cluster client (if initialized).
    pub fn cluster(&self) -> Option<&Arc<LocalCluster>> {
        self.cluster.as_ref()
    }

    /// Release storage (if initialized).
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    /// Authenticating gateway (if initialized).
    pub fn gateway(&self) -> Option<&AuthGateway> {
        self.gateway.as_ref()
    }

    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// The release service wired to the initialized components.
    pub fn release_server(&self) -> Option<ReleaseServer> {
        let gateway = self.gateway.clone()?;
        let storage = self.storage.clone()?;
        let service = ReleaseService::new(storage, gateway.version().clone());
        Some(ReleaseServer::new(
            gateway,
            service,
            self.config.server.max_message_size,
        ))
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(namespace = %self.namespace, "starting Rudder runtime");

        self.init_components().await?;
        self.start_listener()?;

        self.running.store(true, Ordering::Release);
        tracing::info!("Rudder runtime started");
        Ok(())
    }

    async fn init_components(&mut self) -> Result<()> {
        self.init_cluster().await?;
        if let Err(e) = self.init_storage().await {
            self.health.storage = ComponentHealth::Failed;
            return Err(e);
        }
        self.init_gateway();
        Ok(())
    }

    async fn init_cluster(&mut self) -> Result<()> {
        tracing::debug!("initializing cluster client");

        let mut cluster = LocalCluster::new();
        for entry in &self.config.cluster.tokens {
            let user = entry
                .groups
                .iter()
                .fold(UserInfo::new(&entry.username), |user, group| user.with_group(group));
            cluster = cluster.with_token(&entry.token, user);
        }
        for entry in &self.config.cluster.basic_users {
            cluster = cluster.with_basic_user(&entry.username, &entry.password);
        }

        let version = cluster
            .server_version()
            .await
            .context("cluster unreachable")?;
        self.cluster = Some(Arc::new(cluster));
        self.health.cluster = ComponentHealth::Healthy;

        tracing::info!(
            version = %version.git_version,
            tokens = self.config.cluster.tokens.len(),
            basic_users = self.config.cluster.basic_users.len(),
            "cluster client initialized"
        );
        Ok(())
    }

    async fn init_storage(&mut self) -> Result<()> {
        tracing::debug!("initializing release storage");
        let cluster = self
            .cluster
            .clone()
            .context("cluster must be initialized before storage")?;

        let options = StoreOptions::from_config(&self.config.storage)
            .context("invalid storage configuration")?;
        let storage = StorageFactory::new(cluster, self.namespace.clone())
            .open(&options)
            .await
            .with_context(|| format!("failed to open {} storage", options.kind()))?;

        tracing::info!(
            driver = storage.driver_name(),
            namespace = %storage.namespace(),
            "release storage initialized"
        );
        self.storage = Some(storage);
        self.health.storage = ComponentHealth::Healthy;
        Ok(())
    }

    fn init_gateway(&mut self) {
        let Some(cluster) = self.cluster.clone() else {
            self.health.gateway = ComponentHealth::Failed;
            return;
        };
        let timeout = Duration::from_millis(self.config.server.auth_timeout_ms);
        let authenticator = Authenticator::new(cluster.clone(), cluster).with_timeout(timeout);
        self.gateway = Some(
            AuthGateway::new(Arc::new(authenticator)).with_version(VersionInfo::current()),
        );
        self.health.gateway = ComponentHealth::Healthy;
        tracing::info!(auth_timeout_ms = self.config.server.auth_timeout_ms, "gateway initialized");
    }

    fn start_listener(&mut self) -> Result<()> {
        let bind_addr = self.config.listen_addr()?;
        let service = self
            .release_server()
            .context("gateway and storage must be initialized before the listener")?;

        let mut server = GatewayServer::new(bind_addr, service, self.shutdown_rx.clone());
        let server_config = &self.config.server;
        match (&server_config.tls_chain_path, &server_config.tls_key_path) {
            (Some(chain), Some(key)) => {
                let mut tls = TlsConfig::new(chain, key);
                if let Some(ref ca) = server_config.client_ca_path {
                    tls = tls.with_client_ca(ca);
                }
                server = server.with_tls(server_tls_config(&tls)?);
            }
            _ => {
                tracing::warn!(
                    bind = %bind_addr,
                    "starting gateway in INSECURE mode (no TLS); certificate authentication is unavailable"
                );
            }
        }

        self.server_handle = Some(tokio::spawn(server.run()));
        self.health.listener = ComponentHealth::Healthy;
        tracing::info!(bind = %bind_addr, "gateway listener started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        let wait_shutdown = async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        };

        if let Some(handle) = self.server_handle.take() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("shutdown signal received (SIGINT)");
                }
                _ = wait_shutdown => {
                    tracing::info!("shutdown requested by component");
                }
                result = handle => {
                    match result {
                        Ok(Ok(())) => tracing::info!("gateway stopped normally"),
                        Ok(Err(e)) => tracing::error!(error = %e, "gateway failed"),
                        Err(e) => tracing::error!(error = %e, "gateway task panicked"),
                    }
                }
            }
        }

        self.stop().await
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Rudder runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.health.listener = ComponentHealth::Stopping;
        if let Some(handle) = self.server_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(Ok(()))) => tracing::info!("gateway stopped"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "gateway stopped with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "gateway task panicked"),
                Err(_) => tracing::warn!("gateway stop timed out"),
            }
        }
        self.health.listener = ComponentHealth::Stopped;

        self.gateway = None;
        self.health.gateway = ComponentHealth::Stopped;
        self.storage = None;
        self.health.storage = ComponentHealth::Stopped;

        tracing::info!("Rudder runtime stopped");
        Ok(())
    }

    /// Start the runtime for tests (without the listener or signal handling).
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.init_components().await?;
        self.running.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(storage: &str) -> Config {
        Config::from_toml(&format!(
            r#"
[server]
insecure = true
listen = "127.0.0.1:0"

[[cluster.tokens]]
token = "t0k3n"
username = "alice"
groups = ["admins"]

[storage]
{}
"#,
            storage
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_for_tests_wires_components() {
        let mut runtime =
            Runtime::with_namespace(config("driver = \"custom-resource\""), "apps").unwrap();
        runtime.start_for_tests().await.unwrap();

        assert!(runtime.is_running());
        assert_eq!(runtime.namespace(), "apps");
        assert_eq!(runtime.storage().unwrap().driver_name(), "custom-resource");
        assert!(runtime.cluster().unwrap().has_definition("releases.rudder.io"));
        assert!(runtime.release_server().is_some());
        assert_eq!(runtime.health().gateway, ComponentHealth::Healthy);
        assert!(!runtime.health().is_ready());
    }

    #[tokio::test]
    async fn test_bad_object_store_is_fatal() {
        let mut runtime = Runtime::with_namespace(
            config("driver = \"object-store\"\nprovider = \"google\"\ncontainer = \"c\"\ngcs_json_key_path = \"/nonexistent/key.json\""),
            "apps",
        )
        .unwrap();
        assert!(runtime.start_for_tests().await.is_err());
        assert_eq!(runtime.health().storage, ComponentHealth::Failed);
        assert!(runtime.release_server().is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut runtime = Runtime::with_namespace(config(""), "default").unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.health().is_ready());

        runtime.shutdown();
        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
        assert_eq!(runtime.health().listener, ComponentHealth::Stopped);
    }
}
