//! Object store release driver.
//!
//! Release bodies (spec and status as JSON) live in a blob store under
//! `<prefix>/<namespace>/<name>`. A `Release` custom resource per release
//! acts as the namespaced index: it carries the release's labels and
//! resource version, and records the blob key, its xxh64 checksum and the
//! store's entity tag.
//!
//! Write ordering:
//! - create: blob (exclusive), then index; the blob is removed if the
//!   index cannot be created
//! - update: read and verify the current blob, overwrite it conditional
//!   on the version just read, then update the index; the previous body is
//!   put back if the index update fails
//! - delete: index, then blob
//!
//! A release therefore exists exactly when its index entry does, and the
//! indexed checksum always describes the stored body. Writes through one
//! driver are serialized, which is what keeps blob and index in step on
//! stores without conditional puts.

use super::{Release, ReleaseBody, ReleaseEvent, ReleaseStore, ReleaseWatchStream};
use crate::cluster::{ClusterObject, EventKind, LabelSelector, ResourceClient, WatchEvent};
use crate::core::error::{RudderError, RudderResult};
use ::object_store::path::Path;
use ::object_store::{ObjectStore, PutMode, PutPayload, PutResult, UpdateVersion};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::sync::Arc;
use tokio::sync::Mutex;
use twox_hash::XxHash64;

/// Index record stored in the custom resource's `spec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Blob key.
    pub key: String,
    /// xxh64 of the blob, lower-case hex.
    pub checksum: String,
    /// Entity tag returned by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    /// Object version returned by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// xxh64 checksum of `data` as lower-case hex.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    format!("{:016x}", hasher.finish())
}

/// Blob store release driver.
pub struct ObjectStoreDriver {
    index: Arc<dyn ResourceClient>,
    store: Arc<dyn ObjectStore>,
    prefix: String,
    writes: Mutex<()>,
}

impl ObjectStoreDriver {
    pub fn new(
        index: Arc<dyn ResourceClient>,
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            index,
            store,
            prefix: prefix.into(),
            writes: Mutex::new(()),
        }
    }

    /// Blob key of the release `name`.
    pub fn blob_path(&self, name: &str) -> Path {
        let prefix = self.prefix.trim_matches('/');
        let key = if prefix.is_empty() {
            format!("{}/{}", self.index.namespace(), name)
        } else {
            format!("{}/{}/{}", prefix, self.index.namespace(), name)
        };
        Path::from(key)
    }

    /// Conditional put, degrading to a plain overwrite on stores without
    /// conditional writes.
    async fn put_blob(
        &self,
        path: &Path,
        body: Bytes,
        mode: PutMode,
    ) -> Result<PutResult, ::object_store::Error> {
        match self
            .store
            .put_opts(path, PutPayload::from(body.clone()), mode.into())
            .await
        {
            Err(::object_store::Error::NotImplemented) => {
                self.store.put(path, PutPayload::from(body)).await
            }
            other => other,
        }
    }

    /// Current body at `path` and the store version it was read at. The
    /// body must be the one `entry` records.
    async fn read_current(
        &self,
        name: &str,
        path: &Path,
        entry: &IndexEntry,
    ) -> RudderResult<(Bytes, UpdateVersion)> {
        let result = match self.store.get(path).await {
            Ok(result) => result,
            Err(::object_store::Error::NotFound { .. }) => {
                return Err(RudderError::release_not_found(name))
            }
            Err(e) => return Err(store_error(e)),
        };
        let version = UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };
        let data = result.bytes().await.map_err(store_error)?;
        if checksum(&data) != entry.checksum {
            return Err(RudderError::conflict(format!(
                "release \"{}\" body was modified concurrently",
                name
            )));
        }
        Ok((data, version))
    }

    /// Put `previous` back over the body a failed update wrote.
    async fn restore(&self, name: &str, path: &Path, previous: Bytes, written: PutResult) {
        let mode = conditional_on(UpdateVersion {
            e_tag: written.e_tag,
            version: written.version,
        });
        if let Err(e) = self.put_blob(path, previous, mode).await {
            tracing::warn!(release = %name, error = %e, "failed to restore release body");
        }
    }

    fn index_object(&self, release: &Release, entry: &IndexEntry) -> RudderResult<ClusterObject> {
        Ok(ClusterObject::new(release.metadata.clone())
            .with_field("spec", serde_json::to_value(entry)?))
    }
}

fn conditional_on(version: UpdateVersion) -> PutMode {
    if version.e_tag.is_none() && version.version.is_none() {
        PutMode::Overwrite
    } else {
        PutMode::Update(version)
    }
}

fn store_error(e: ::object_store::Error) -> RudderError {
    RudderError::unavailable(format!("object store: {}", e))
}

fn release_error(err: RudderError, name: &str) -> RudderError {
    match err {
        RudderError::NotFound { .. } => RudderError::release_not_found(name),
        RudderError::AlreadyExists { .. } => RudderError::release_exists(name),
        other => other,
    }
}

fn read_entry(index: &ClusterObject) -> RudderResult<IndexEntry> {
    let spec = index.field("spec").cloned().ok_or_else(|| {
        RudderError::internal(format!(
            "index for release \"{}\" has no spec",
            index.metadata.name
        ))
    })?;
    Ok(serde_json::from_value(spec)?)
}

/// Load the body an index entry points at and verify its checksum.
async fn fetch(store: &dyn ObjectStore, index: ClusterObject) -> RudderResult<Release> {
    let entry = read_entry(&index)?;
    let name = index.metadata.name.clone();
    let data = match store.get(&Path::from(entry.key.as_str())).await {
        Ok(result) => result.bytes().await.map_err(store_error)?,
        Err(::object_store::Error::NotFound { .. }) => {
            tracing::warn!(release = %name, key = %entry.key, "indexed release body is missing");
            return Err(RudderError::release_not_found(name));
        }
        Err(e) => return Err(store_error(e)),
    };

    let actual = checksum(&data);
    if actual != entry.checksum {
        return Err(RudderError::conflict(format!(
            "release \"{}\" body checksum {} does not match index {}",
            name, actual, entry.checksum
        )));
    }

    let body: ReleaseBody = serde_json::from_slice(&data)?;
    Ok(body.into_release(index.metadata))
}

#[async_trait]
impl ReleaseStore for ObjectStoreDriver {
    fn name(&self) -> &'static str {
        "object-store"
    }

    fn namespace(&self) -> &str {
        self.index.namespace()
    }

    async fn get(&self, name: &str) -> RudderResult<Release> {
        let index = self
            .index
            .get(name)
            .await
            .map_err(|e| release_error(e, name))?;
        fetch(self.store.as_ref(), index).await
    }

    async fn list(&self, selector: &LabelSelector) -> RudderResult<Vec<Release>> {
        let entries = self.index.list(selector).await?;
        let fetched =
            futures::future::join_all(entries.into_iter().map(|i| fetch(self.store.as_ref(), i)))
                .await;

        let mut releases = Vec::with_capacity(fetched.len());
        for result in fetched {
            match result {
                Ok(release) => releases.push(release),
                // Deleted between listing the index and reading the body.
                Err(RudderError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(releases)
    }

    async fn create(&self, release: Release) -> RudderResult<Release> {
        let name = release.name().to_string();
        let _writes = self.writes.lock().await;
        match self.index.get(&name).await {
            Ok(_) => return Err(RudderError::release_exists(name)),
            Err(RudderError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let body = Bytes::from(serde_json::to_vec(&ReleaseBody::of(&release))?);
        let path = self.blob_path(&name);
        let sum = checksum(&body);
        let put = match self.put_blob(&path, body, PutMode::Create).await {
            Ok(put) => put,
            // Either a concurrent create or a body left by an interrupted one.
            Err(::object_store::Error::AlreadyExists { .. }) => {
                return Err(RudderError::release_exists(name))
            }
            Err(e) => return Err(store_error(e)),
        };

        let entry = IndexEntry {
            key: path.to_string(),
            checksum: sum,
            e_tag: put.e_tag,
            version: put.version,
        };
        let mut indexed = release.clone();
        indexed.metadata.resource_version.clear();
        match self.index.create(self.index_object(&indexed, &entry)?).await {
            Ok(created) => Ok(ReleaseBody::of(&release).into_release(created.metadata)),
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&path).await {
                    tracing::warn!(release = %name, error = %cleanup, "failed to remove orphaned release body");
                }
                Err(release_error(e, &name))
            }
        }
    }

    async fn update(&self, release: Release) -> RudderResult<Release> {
        let name = release.name().to_string();
        let _writes = self.writes.lock().await;
        let current = self
            .index
            .get(&name)
            .await
            .map_err(|e| release_error(e, &name))?;

        let expected = release.resource_version();
        if !expected.is_empty() && expected != current.metadata.resource_version {
            return Err(RudderError::conflict(format!(
                "release \"{}\" was modified: resource version {} does not match {}",
                name, expected, current.metadata.resource_version
            )));
        }

        let path = self.blob_path(&name);
        let (previous, read_at) = self.read_current(&name, &path, &read_entry(&current)?).await?;
        let body = Bytes::from(serde_json::to_vec(&ReleaseBody::of(&release))?);
        let sum = checksum(&body);
        let put = match self.put_blob(&path, body, conditional_on(read_at)).await {
            Ok(put) => put,
            Err(::object_store::Error::Precondition { .. }) => {
                return Err(RudderError::conflict(format!(
                    "release \"{}\" body was modified concurrently",
                    name
                )))
            }
            Err(e) => return Err(store_error(e)),
        };

        let entry = IndexEntry {
            key: path.to_string(),
            checksum: sum,
            e_tag: put.e_tag.clone(),
            version: put.version.clone(),
        };
        let mut indexed = release.clone();
        indexed.metadata.resource_version = current.metadata.resource_version.clone();
        match self.index.update(self.index_object(&indexed, &entry)?).await {
            Ok(updated) => Ok(ReleaseBody::of(&release).into_release(updated.metadata)),
            Err(e) => {
                tracing::warn!(release = %name, error = %e, "index update failed, restoring previous body");
                self.restore(&name, &path, previous, put).await;
                Err(release_error(e, &name))
            }
        }
    }

    async fn update_status(&self, release: Release) -> RudderResult<Release> {
        // Status is part of the body.
        self.update(release).await
    }

    async fn delete(&self, name: &str) -> RudderResult<()> {
        let path = self.blob_path(name);
        let _writes = self.writes.lock().await;
        match self.index.delete(name).await {
            Ok(()) => {}
            Err(RudderError::NotFound { .. }) => {
                // Clear a body left behind by an interrupted create.
                match self.store.delete(&path).await {
                    Ok(()) | Err(::object_store::Error::NotFound { .. }) => {}
                    Err(e) => tracing::debug!(release = name, error = %e, "orphan cleanup failed"),
                }
                return Err(RudderError::release_not_found(name));
            }
            Err(e) => return Err(e),
        }

        match self.store.delete(&path).await {
            Ok(()) | Err(::object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => {
                tracing::warn!(release = name, error = %e, "release deleted but body removal failed");
                Ok(())
            }
        }
    }

    async fn watch(&self, selector: &LabelSelector) -> RudderResult<ReleaseWatchStream> {
        let events = self.index.watch(selector).await?;
        let store = self.store.clone();
        Ok(events
            .then(move |event| {
                let store = store.clone();
                async move {
                    let WatchEvent { kind, object } = event?;
                    let release = match kind {
                        // The body is gone; report what the index knew.
                        EventKind::Deleted => Release {
                            metadata: object.metadata,
                            ..Default::default()
                        },
                        EventKind::Added | EventKind::Modified => {
                            fetch(store.as_ref(), object).await?
                        }
                    };
                    Ok(ReleaseEvent::new(kind, release))
                }
            })
            .boxed())
    }
}
