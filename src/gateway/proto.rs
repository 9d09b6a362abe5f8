//! Wire messages for `rudder.services.ReleaseService`.

use crate::cluster::{EventKind, ObjectMeta};
use crate::storage;
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetVersionRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetVersionResponse {
    #[prost(string, tag = "1")]
    pub sem_ver: String,
    #[prost(string, tag = "2")]
    pub git_commit: String,
    #[prost(string, tag = "3")]
    pub git_tree_state: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WhoAmIRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WhoAmIResponse {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, repeated, tag = "2")]
    pub groups: Vec<String>,
    #[prost(bool, tag = "3")]
    pub impersonating: bool,
}

/// Release lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Unknown = 0,
    Deployed = 1,
    Deleted = 2,
    Superseded = 3,
    Failed = 4,
    Deleting = 5,
    PendingInstall = 6,
    PendingUpgrade = 7,
    PendingRollback = 8,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReleaseStatus {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub description: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Release {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(btree_map = "string, string", tag = "3")]
    pub labels: BTreeMap<String, String>,
    #[prost(string, tag = "4")]
    pub resource_version: String,
    #[prost(int32, tag = "5")]
    pub version: i32,
    #[prost(bytes = "vec", tag = "6")]
    pub payload: Vec<u8>,
    #[prost(message, optional, tag = "7")]
    pub status: Option<ReleaseStatus>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetReleaseRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetReleaseResponse {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListReleasesRequest {
    /// Equality requirements; empty matches everything.
    #[prost(btree_map = "string, string", tag = "1")]
    pub selector: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListReleasesResponse {
    #[prost(message, repeated, tag = "1")]
    pub releases: Vec<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstallReleaseRequest {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstallReleaseResponse {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateReleaseRequest {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateReleaseResponse {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateReleaseStatusRequest {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateReleaseStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub release: Option<Release>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UninstallReleaseRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UninstallReleaseResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WatchReleasesRequest {
    #[prost(btree_map = "string, string", tag = "1")]
    pub selector: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Added = 0,
    Modified = 1,
    Deleted = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WatchReleasesResponse {
    #[prost(enumeration = "EventType", tag = "1")]
    pub kind: i32,
    #[prost(message, optional, tag = "2")]
    pub release: Option<Release>,
}

impl From<storage::StatusCode> for StatusCode {
    fn from(code: storage::StatusCode) -> Self {
        use storage::StatusCode as S;
        match code {
            S::Unknown => Self::Unknown,
            S::Deployed => Self::Deployed,
            S::Deleted => Self::Deleted,
            S::Superseded => Self::Superseded,
            S::Failed => Self::Failed,
            S::Deleting => Self::Deleting,
            S::PendingInstall => Self::PendingInstall,
            S::PendingUpgrade => Self::PendingUpgrade,
            S::PendingRollback => Self::PendingRollback,
        }
    }
}

impl From<StatusCode> for storage::StatusCode {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Unknown => Self::Unknown,
            StatusCode::Deployed => Self::Deployed,
            StatusCode::Deleted => Self::Deleted,
            StatusCode::Superseded => Self::Superseded,
            StatusCode::Failed => Self::Failed,
            StatusCode::Deleting => Self::Deleting,
            StatusCode::PendingInstall => Self::PendingInstall,
            StatusCode::PendingUpgrade => Self::PendingUpgrade,
            StatusCode::PendingRollback => Self::PendingRollback,
        }
    }
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Added => Self::Added,
            EventKind::Modified => Self::Modified,
            EventKind::Deleted => Self::Deleted,
        }
    }
}

impl From<storage::Release> for Release {
    fn from(release: storage::Release) -> Self {
        Self {
            name: release.metadata.name,
            namespace: release.metadata.namespace,
            labels: release.metadata.labels,
            resource_version: release.metadata.resource_version,
            version: release.spec.version,
            payload: release.spec.payload,
            status: Some(ReleaseStatus {
                code: StatusCode::from(release.status.code) as i32,
                description: release.status.description,
            }),
        }
    }
}

impl From<Release> for storage::Release {
    fn from(release: Release) -> Self {
        // Unknown codes decode as `Unknown`.
        let status = release
            .status
            .map(|s| storage::ReleaseStatus {
                code: s.code().into(),
                description: s.description,
            })
            .unwrap_or_default();
        Self {
            metadata: ObjectMeta {
                name: release.name,
                namespace: release.namespace,
                labels: release.labels,
                resource_version: release.resource_version,
            },
            spec: storage::ReleaseSpec {
                version: release.version,
                payload: release.payload,
            },
            status,
        }
    }
}

impl From<storage::ReleaseEvent> for WatchReleasesResponse {
    fn from(event: storage::ReleaseEvent) -> Self {
        Self {
            kind: EventType::from(event.kind) as i32,
            release: Some(event.release.into()),
        }
    }
}
