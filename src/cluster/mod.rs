//! Cluster collaborator interface.
//!
//! The gateway and the storage drivers never talk to a cluster API server
//! directly; they consume the traits in this module:
//!
//! - [`ClusterClient`] - version probe, token review, resource definitions
//! - [`ResourceClient`] - namespaced CRUD/watch verbs over [`ClusterObject`]
//! - [`ClusterConnector`] - builds a client for a derived [`ClientConfig`]
//!
//! [`local`] provides the in-process implementation served by the binary
//! and used throughout the tests.

pub mod labels;
pub mod local;

use crate::core::error::RudderResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use labels::LabelSelector;
pub use local::LocalCluster;

/// Connection settings for a cluster client.
///
/// A system config holds the gateway's own credentials; per-call user
/// configs are derived from it by the credential verifiers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// API server base URL.
    pub host: String,
    /// API path (e.g. `/api`).
    pub api_path: String,
    /// Path prefix under the host.
    pub prefix: String,
    /// Bearer token.
    pub bearer_token: Option<String>,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// User to impersonate on every request.
    pub impersonate: Option<String>,
    /// TLS material.
    pub tls: ClientTlsConfig,
}

/// TLS material for a cluster client.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientTlsConfig {
    /// CA bundle (PEM).
    pub ca_data: Option<Vec<u8>>,
    /// Client certificate (PEM).
    pub cert_data: Option<Vec<u8>>,
    /// Client key (PEM).
    pub key_data: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub insecure: bool,
}

impl ClientConfig {
    /// Create a config pointing at `host` with no credentials.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Same credentials, with all actions attributed to `user`.
    pub fn impersonating(&self, user: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.impersonate = Some(user.into());
        config
    }

    /// Endpoint settings and certificate data of `self`, authenticated by `token`.
    pub fn with_bearer_token(&self, token: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            api_path: self.api_path.clone(),
            prefix: self.prefix.clone(),
            bearer_token: Some(token.into()),
            tls: self.endpoint_tls(),
            ..Default::default()
        }
    }

    /// Endpoint settings and certificate data of `self`, authenticated by basic credentials.
    pub fn with_basic_auth(&self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            api_path: self.api_path.clone(),
            prefix: self.prefix.clone(),
            username: Some(username.into()),
            password: Some(password.into()),
            tls: self.endpoint_tls(),
            ..Default::default()
        }
    }

    // The client key never leaves the system config.
    fn endpoint_tls(&self) -> ClientTlsConfig {
        ClientTlsConfig {
            ca_data: self.tls.ca_data.clone(),
            cert_data: self.tls.cert_data.clone(),
            key_data: None,
            insecure: self.tls.insecure,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("api_path", &self.api_path)
            .field("prefix", &self.prefix)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("impersonate", &self.impersonate)
            .field("tls", &self.tls)
            .finish()
    }
}

impl fmt::Debug for ClientTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTlsConfig")
            .field("ca_data", &self.ca_data.as_ref().map(Vec::len))
            .field("cert_data", &self.cert_data.as_ref().map(Vec::len))
            .field("key_data", &self.key_data.as_ref().map(|_| "<redacted>"))
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Verified caller identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// User name.
    pub username: String,
    /// Unique identifier, when the cluster reports one.
    #[serde(default)]
    pub uid: Option<String>,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserInfo {
    /// Create a user with no groups.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            uid: None,
            groups: Vec::new(),
        }
    }

    /// Add a group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }
}

/// Result of a token review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenReviewStatus {
    /// Whether the token was recognized.
    pub authenticated: bool,
    /// Identity the token represents.
    pub user: Option<UserInfo>,
    /// Error reported by the reviewer.
    pub error: Option<String>,
}

/// API server version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: String,
    pub minor: String,
    pub git_version: String,
}

/// A namespaced resource type served by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType {
    /// API group (empty for the core group).
    pub group: &'static str,
    /// API version.
    pub version: &'static str,
    /// Kind.
    pub kind: &'static str,
    /// Plural resource name.
    pub plural: &'static str,
}

impl ResourceType {
    /// Config maps in the core group.
    pub const CONFIG_MAPS: ResourceType = ResourceType {
        group: "",
        version: "v1",
        kind: "ConfigMap",
        plural: "configmaps",
    };

    /// Release custom resources.
    pub const RELEASES: ResourceType = ResourceType {
        group: "rudder.io",
        version: "v1alpha1",
        kind: "Release",
        plural: "releases",
    };

    /// `apiVersion` string.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Whether this type must be registered before use.
    pub fn is_custom(&self) -> bool {
        !self.group.is_empty()
    }

    /// Name of the definition registering this type.
    pub fn definition_name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }

    /// Key identifying this type.
    pub fn key(&self) -> String {
        format!("{}/{}", self.api_version(), self.plural)
    }
}

/// Registration of a custom resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDefinition {
    /// `<plural>.<group>`.
    pub name: String,
    /// Registered type.
    pub resource: ResourceType,
    /// Whether the type has a status subresource.
    pub status_subresource: bool,
}

impl ResourceDefinition {
    /// Definition for `resource` with a status subresource.
    pub fn for_type(resource: ResourceType) -> Self {
        Self {
            name: resource.definition_name(),
            resource,
            status_subresource: true,
        }
    }
}

/// Object metadata shared by all stored objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within the namespace.
    pub name: String,
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Opaque revision token for optimistic concurrency.
    #[serde(default)]
    pub resource_version: String,
}

impl ObjectMeta {
    /// Metadata with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A stored cluster object: metadata plus its JSON body.
///
/// The body holds every top-level field except metadata, e.g.
/// `{"data": {...}}` for a config map or `{"spec": ..., "status": ...}`
/// for a custom resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterObject {
    pub metadata: ObjectMeta,
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl ClusterObject {
    /// Create an object with an empty body.
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            body: serde_json::Map::new(),
        }
    }

    /// Set a top-level body field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    /// Get a top-level body field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.body.get(key)
    }
}

/// Kind of change reported by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// A change event.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent<T> {
    pub kind: EventKind,
    pub object: T,
}

impl<T> WatchEvent<T> {
    pub fn new(kind: EventKind, object: T) -> Self {
        Self { kind, object }
    }
}

/// Stream of object changes; dropping it ends the subscription.
pub type ObjectWatchStream = BoxStream<'static, RudderResult<WatchEvent<ClusterObject>>>;

/// Cluster API client.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Configuration this client was built from.
    fn config(&self) -> &ClientConfig;

    /// Lightweight authenticated read, used to verify credentials.
    async fn server_version(&self) -> RudderResult<ServerVersion>;

    /// Submit a bearer token for review.
    async fn token_review(&self, token: &str) -> RudderResult<TokenReviewStatus>;

    /// Fetch a custom resource definition by name.
    async fn get_resource_definition(&self, name: &str) -> RudderResult<ResourceDefinition>;

    /// Register a custom resource definition.
    async fn create_resource_definition(
        &self,
        definition: &ResourceDefinition,
    ) -> RudderResult<ResourceDefinition>;

    /// Verbs over `resource` confined to `namespace`.
    fn resources(&self, resource: ResourceType, namespace: &str) -> Arc<dyn ResourceClient>;
}

/// Namespaced CRUD and watch verbs.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Namespace all verbs operate in.
    fn namespace(&self) -> &str;

    async fn get(&self, name: &str) -> RudderResult<ClusterObject>;

    async fn list(&self, selector: &LabelSelector) -> RudderResult<Vec<ClusterObject>>;

    async fn create(&self, object: ClusterObject) -> RudderResult<ClusterObject>;

    /// Replace the object; a non-empty resource version must match the stored one.
    async fn update(&self, object: ClusterObject) -> RudderResult<ClusterObject>;

    /// Replace only the `status` field.
    async fn update_status(&self, object: ClusterObject) -> RudderResult<ClusterObject>;

    async fn delete(&self, name: &str) -> RudderResult<()>;

    async fn watch(&self, selector: &LabelSelector) -> RudderResult<ObjectWatchStream>;
}

/// Builds clients for derived configurations.
pub trait ClusterConnector: Send + Sync {
    fn connect(&self, config: &ClientConfig) -> RudderResult<Arc<dyn ClusterClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_config() -> ClientConfig {
        ClientConfig {
            host: "https://10.0.0.1:6443".to_string(),
            api_path: "/api".to_string(),
            prefix: String::new(),
            bearer_token: Some("system-token".to_string()),
            username: None,
            password: None,
            impersonate: None,
            tls: ClientTlsConfig {
                ca_data: Some(b"ca".to_vec()),
                cert_data: Some(b"cert".to_vec()),
                key_data: Some(b"key".to_vec()),
                insecure: false,
            },
        }
    }

    #[test]
    fn test_impersonating_keeps_system_credentials() {
        let config = system_config().impersonating("alice");
        assert_eq!(config.impersonate.as_deref(), Some("alice"));
        assert_eq!(config.bearer_token.as_deref(), Some("system-token"));
        assert_eq!(config.tls.key_data.as_deref(), Some(&b"key"[..]));
    }

    #[test]
    fn test_bearer_config_drops_system_credentials() {
        let config = system_config().with_bearer_token("user-token");
        assert_eq!(config.host, "https://10.0.0.1:6443");
        assert_eq!(config.bearer_token.as_deref(), Some("user-token"));
        assert!(config.impersonate.is_none());
        assert_eq!(config.tls.cert_data.as_deref(), Some(&b"cert"[..]));
        assert!(config.tls.key_data.is_none());
    }

    #[test]
    fn test_basic_config() {
        let config = system_config().with_basic_auth("bob", "hunter2");
        assert_eq!(config.username.as_deref(), Some("bob"));
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", system_config().with_basic_auth("bob", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("bob"));
    }

    #[test]
    fn test_resource_type_names() {
        assert_eq!(ResourceType::CONFIG_MAPS.api_version(), "v1");
        assert!(!ResourceType::CONFIG_MAPS.is_custom());
        assert_eq!(ResourceType::RELEASES.api_version(), "rudder.io/v1alpha1");
        assert_eq!(
            ResourceType::RELEASES.definition_name(),
            "releases.rudder.io"
        );
    }
}
