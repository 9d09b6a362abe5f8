//! Release drivers backed by cluster objects.
//!
//! One cluster object per release, keyed by name in the driver's
//! namespace. Concurrency control is delegated to the cluster's resource
//! versions; this layer takes no locks of its own. The object layout is
//! supplied by an [`ObjectCodec`].

use super::{Release, ReleaseEvent, ReleaseStore, ReleaseWatchStream};
use crate::cluster::{ClusterObject, LabelSelector, ResourceClient, WatchEvent};
use crate::core::error::{RudderError, RudderResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Maps releases to and from cluster objects.
pub trait ObjectCodec: Send + Sync + 'static {
    /// Driver name for logs.
    const NAME: &'static str;

    /// Whether status is written through a separate subresource.
    const STATUS_SUBRESOURCE: bool;

    fn encode(&self, release: &Release) -> RudderResult<ClusterObject>;

    fn decode(&self, object: ClusterObject) -> RudderResult<Release>;

    /// Selector sent to the cluster for `selector`.
    fn push_down(&self, selector: &LabelSelector) -> RudderResult<LabelSelector> {
        Ok(selector.clone())
    }
}

/// Release driver over a [`ResourceClient`].
pub struct ClusterDriver<C> {
    resources: Arc<dyn ResourceClient>,
    codec: Arc<C>,
}

impl<C: ObjectCodec> ClusterDriver<C> {
    pub fn new(resources: Arc<dyn ResourceClient>, codec: C) -> Self {
        Self {
            resources,
            codec: Arc::new(codec),
        }
    }
}

/// Rename cluster not-found/exists errors to refer to the release.
fn release_error(err: RudderError, name: &str) -> RudderError {
    match err {
        RudderError::NotFound { .. } => RudderError::release_not_found(name),
        RudderError::AlreadyExists { .. } => RudderError::release_exists(name),
        other => other,
    }
}

#[async_trait]
impl<C: ObjectCodec> ReleaseStore for ClusterDriver<C> {
    fn name(&self) -> &'static str {
        C::NAME
    }

    fn namespace(&self) -> &str {
        self.resources.namespace()
    }

    async fn get(&self, name: &str) -> RudderResult<Release> {
        let object = self
            .resources
            .get(name)
            .await
            .map_err(|e| release_error(e, name))?;
        self.codec.decode(object)
    }

    async fn list(&self, selector: &LabelSelector) -> RudderResult<Vec<Release>> {
        self.resources
            .list(&self.codec.push_down(selector)?)
            .await?
            .into_iter()
            .map(|object| self.codec.decode(object))
            .collect()
    }

    async fn create(&self, release: Release) -> RudderResult<Release> {
        let object = self.codec.encode(&release)?;
        let created = self
            .resources
            .create(object)
            .await
            .map_err(|e| release_error(e, release.name()))?;
        self.codec.decode(created)
    }

    async fn update(&self, release: Release) -> RudderResult<Release> {
        let object = self.codec.encode(&release)?;
        let updated = self
            .resources
            .update(object)
            .await
            .map_err(|e| release_error(e, release.name()))?;
        self.codec.decode(updated)
    }

    async fn update_status(&self, release: Release) -> RudderResult<Release> {
        if !C::STATUS_SUBRESOURCE {
            return self.update(release).await;
        }
        let object = self.codec.encode(&release)?;
        let updated = self
            .resources
            .update_status(object)
            .await
            .map_err(|e| release_error(e, release.name()))?;
        self.codec.decode(updated)
    }

    async fn delete(&self, name: &str) -> RudderResult<()> {
        self.resources
            .delete(name)
            .await
            .map_err(|e| release_error(e, name))
    }

    async fn watch(&self, selector: &LabelSelector) -> RudderResult<ReleaseWatchStream> {
        let events = self.resources.watch(&self.codec.push_down(selector)?).await?;
        let codec = self.codec.clone();
        Ok(events
            .map(move |event| {
                let WatchEvent { kind, object } = event?;
                Ok(ReleaseEvent::new(kind, codec.decode(object)?))
            })
            .boxed())
    }
}
