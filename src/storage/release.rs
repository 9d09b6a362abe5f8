//! Release model.

use crate::cluster::{EventKind, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, namespaced record of one deployed application instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Name, namespace, labels and revision token.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: ReleaseSpec,
    /// Observed state.
    #[serde(default)]
    pub status: ReleaseStatus,
}

impl Release {
    /// Create a release with an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            ..Default::default()
        }
    }

    /// Set a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.spec.payload = payload.into();
        self
    }

    /// Set the status.
    pub fn with_status(mut self, code: StatusCode, description: impl Into<String>) -> Self {
        self.status = ReleaseStatus {
            code,
            description: description.into(),
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    pub fn resource_version(&self) -> &str {
        &self.metadata.resource_version
    }
}

/// Desired state of a release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Revision number of the deployed package.
    #[serde(default)]
    pub version: i32,
    /// Opaque packaged application state.
    #[serde(default, with = "payload_base64")]
    pub payload: Vec<u8>,
}

/// Observed state of a release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    #[serde(default)]
    pub code: StatusCode,
    #[serde(default)]
    pub description: String,
}

/// Lifecycle state of a release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    #[default]
    Unknown,
    Deployed,
    Deleted,
    Superseded,
    Failed,
    Deleting,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

/// Spec and status without metadata, as persisted in bodies and blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseBody {
    #[serde(default)]
    pub spec: ReleaseSpec,
    #[serde(default)]
    pub status: ReleaseStatus,
}

impl ReleaseBody {
    pub fn of(release: &Release) -> Self {
        Self {
            spec: release.spec.clone(),
            status: release.status.clone(),
        }
    }

    /// Attach metadata.
    pub fn into_release(self, metadata: ObjectMeta) -> Release {
        Release {
            metadata,
            spec: self.spec,
            status: self.status,
        }
    }
}

/// A change to a watched release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub kind: EventKind,
    pub release: Release,
}

impl ReleaseEvent {
    pub fn new(kind: EventKind, release: Release) -> Self {
        Self { kind, release }
    }
}

/// Releases returned by a list, in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseList {
    pub items: Vec<Release>,
}

impl ReleaseList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Release> {
        self.items.iter()
    }

    /// Names of the listed releases.
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(Release::name).collect()
    }
}

impl FromIterator<Release> for ReleaseList {
    fn from_iter<I: IntoIterator<Item = Release>>(iter: I) -> Self {
        let mut items: Vec<Release> = iter.into_iter().collect();
        items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Self { items }
    }
}

impl IntoIterator for ReleaseList {
    type Item = Release;
    type IntoIter = std::vec::IntoIter<Release>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

mod payload_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
