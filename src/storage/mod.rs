//! Release storage.
//!
//! [`ReleaseStore`] is the uniform contract every backend implements.
//! [`Storage`] sits in front of the selected driver and enforces the
//! parts of the contract that do not depend on the backend:
//!
//! - writes are confined to the store's namespace
//! - list and watch results are filtered by the selector client-side,
//!   whether or not the driver pushed the selector down
//!
//! # Drivers
//!
//! - [`memory`] - process-local map
//! - [`config_object`] - one config map per release
//! - [`custom_resource`] - one `Release` custom resource per release
//! - [`object_store`] - release body in a blob store, custom resource as index
//!
//! [`factory`] selects one at startup.

pub mod cluster_driver;
pub mod config_object;
pub mod custom_resource;
pub mod factory;
pub mod memory;
pub mod object_store;
pub mod provider;
pub mod release;

use crate::cluster::LabelSelector;
use crate::core::error::{RudderError, RudderResult};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;

pub use factory::{StorageFactory, StoreKind, StoreOptions};
pub use memory::MemoryDriver;
pub use provider::{ObjectStoreOptions, ObjectStoreProvider};
pub use release::{
    Release, ReleaseBody, ReleaseEvent, ReleaseList, ReleaseSpec, ReleaseStatus, StatusCode,
};

/// Live sequence of release changes; dropping it cancels the subscription.
pub type ReleaseWatchStream = BoxStream<'static, RudderResult<ReleaseEvent>>;

/// Uniform release persistence contract.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Driver name for logs.
    fn name(&self) -> &'static str;

    /// Namespace the driver is bound to.
    fn namespace(&self) -> &str;

    async fn get(&self, name: &str) -> RudderResult<Release>;

    /// List releases. Drivers may push `selector` down but are not required to.
    async fn list(&self, selector: &LabelSelector) -> RudderResult<Vec<Release>>;

    /// Create; fails with `AlreadyExists` when the name is taken.
    async fn create(&self, release: Release) -> RudderResult<Release>;

    /// Replace; a non-empty resource version must match the stored one.
    async fn update(&self, release: Release) -> RudderResult<Release>;

    /// Write the status portion, or the whole release where the backend
    /// does not distinguish status.
    async fn update_status(&self, release: Release) -> RudderResult<Release>;

    async fn delete(&self, name: &str) -> RudderResult<()>;

    async fn watch(&self, selector: &LabelSelector) -> RudderResult<ReleaseWatchStream>;
}

/// Front end over the selected driver.
#[derive(Clone)]
pub struct Storage {
    driver: Arc<dyn ReleaseStore>,
}

impl Storage {
    pub fn new(driver: Arc<dyn ReleaseStore>) -> Self {
        Self { driver }
    }

    /// Driver name.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Namespace all operations are confined to.
    pub fn namespace(&self) -> &str {
        self.driver.namespace()
    }

    pub async fn get(&self, name: &str) -> RudderResult<Release> {
        check_name(name)?;
        tracing::debug!(driver = self.driver.name(), name, "get release");
        self.driver.get(name).await
    }

    /// List releases whose labels contain every pair in `selector`.
    pub async fn list(&self, selector: &LabelSelector) -> RudderResult<ReleaseList> {
        tracing::debug!(driver = self.driver.name(), %selector, "list releases");
        let releases = self.driver.list(selector).await?;
        Ok(releases
            .into_iter()
            .filter(|r| selector.matches(r.labels()))
            .collect())
    }

    pub async fn create(&self, release: Release) -> RudderResult<Release> {
        let release = self.confine(release)?;
        tracing::debug!(driver = self.driver.name(), name = release.name(), "create release");
        self.driver.create(release).await
    }

    pub async fn update(&self, release: Release) -> RudderResult<Release> {
        let release = self.confine(release)?;
        tracing::debug!(
            driver = self.driver.name(),
            name = release.name(),
            resource_version = release.resource_version(),
            "update release"
        );
        self.driver.update(release).await
    }

    pub async fn update_status(&self, release: Release) -> RudderResult<Release> {
        let release = self.confine(release)?;
        tracing::debug!(
            driver = self.driver.name(),
            name = release.name(),
            code = ?release.status.code,
            "update release status"
        );
        self.driver.update_status(release).await
    }

    pub async fn delete(&self, name: &str) -> RudderResult<()> {
        check_name(name)?;
        tracing::debug!(driver = self.driver.name(), name, "delete release");
        self.driver.delete(name).await
    }

    /// Watch releases matching `selector` until the stream is dropped.
    pub async fn watch(&self, selector: &LabelSelector) -> RudderResult<ReleaseWatchStream> {
        tracing::debug!(driver = self.driver.name(), %selector, "watch releases");
        let selector = selector.clone();
        let events = self.driver.watch(&selector).await?;
        Ok(events
            .filter(move |event| {
                let keep = match event {
                    Ok(event) => selector.matches(event.release.labels()),
                    Err(_) => true,
                };
                futures::future::ready(keep)
            })
            .boxed())
    }

    fn confine(&self, mut release: Release) -> RudderResult<Release> {
        check_name(&release.metadata.name)?;
        release.metadata.namespace = self.driver.namespace().to_string();
        Ok(release)
    }
}

fn check_name(name: &str) -> RudderResult<()> {
    if name.is_empty() {
        return Err(RudderError::invalid_request("release name is required"));
    }
    Ok(())
}
