//! In-process cluster.
//!
//! Implements the full collaborator surface in memory: resource versions
//! and optimistic concurrency, label selectors, status subresources,
//! watch fan-out, custom resource registration, token review and basic
//! credential checks. Every handle produced by [`LocalCluster::connect`]
//! shares the same state but authenticates with its own config.

use super::{
    ClientConfig, ClusterClient, ClusterConnector, ClusterObject, EventKind, LabelSelector,
    ObjectWatchStream, ResourceClient, ResourceDefinition, ResourceType, ServerVersion,
    TokenReviewStatus, UserInfo, WatchEvent,
};
use crate::core::error::{RudderError, RudderResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered events per watch subscriber.
const WATCH_BUFFER: usize = 256;

/// Host reported by local cluster configs.
pub const LOCAL_HOST: &str = "local://cluster";

#[derive(Debug, Clone)]
struct StoredEvent {
    type_key: String,
    namespace: String,
    event: WatchEvent<ClusterObject>,
}

struct Inner {
    revision: u64,
    reachable: bool,
    definitions: BTreeMap<String, ResourceDefinition>,
    objects: HashMap<(String, String), BTreeMap<String, ClusterObject>>,
    tokens: HashMap<String, UserInfo>,
    basic_users: HashMap<String, String>,
}

struct LocalState {
    version: ServerVersion,
    inner: Mutex<Inner>,
    events: broadcast::Sender<StoredEvent>,
}

/// In-process cluster handle.
#[derive(Clone)]
pub struct LocalCluster {
    state: Arc<LocalState>,
    config: ClientConfig,
}

impl LocalCluster {
    /// Create an empty cluster; the returned handle acts with system credentials.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Arc::new(LocalState {
                version: ServerVersion {
                    major: "1".to_string(),
                    minor: "31".to_string(),
                    git_version: "v1.31.0-local".to_string(),
                },
                inner: Mutex::new(Inner {
                    revision: 0,
                    reachable: true,
                    definitions: BTreeMap::new(),
                    objects: HashMap::new(),
                    tokens: HashMap::new(),
                    basic_users: HashMap::new(),
                }),
                events,
            }),
            config: ClientConfig::new(LOCAL_HOST),
        }
    }

    /// Register a bearer token and the identity it represents.
    pub fn with_token(self, token: impl Into<String>, user: UserInfo) -> Self {
        self.state.inner.lock().tokens.insert(token.into(), user);
        self
    }

    /// Register basic credentials.
    pub fn with_basic_user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.state
            .inner
            .lock()
            .basic_users
            .insert(username.into(), password.into());
        self
    }

    /// Simulate losing (or regaining) the connection to the cluster.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.inner.lock().reachable = reachable;
    }

    /// Whether a definition with `name` is registered.
    pub fn has_definition(&self, name: &str) -> bool {
        self.state.inner.lock().definitions.contains_key(name)
    }

    fn authorize(&self) -> RudderResult<()> {
        let inner = self.state.inner.lock();
        if !inner.reachable {
            return Err(RudderError::unavailable(format!(
                "cannot reach cluster at {}",
                self.config.host
            )));
        }
        if let Some(ref username) = self.config.username {
            let ok = inner
                .basic_users
                .get(username)
                .is_some_and(|p| Some(p) == self.config.password.as_ref());
            if !ok {
                return Err(RudderError::unauthenticated("Unauthorized"));
            }
        }
        if let Some(ref token) = self.config.bearer_token {
            if !inner.tokens.contains_key(token) {
                return Err(RudderError::unauthenticated("Unauthorized"));
            }
        }
        Ok(())
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for LocalCluster {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn server_version(&self) -> RudderResult<ServerVersion> {
        self.authorize()?;
        Ok(self.state.version.clone())
    }

    async fn token_review(&self, token: &str) -> RudderResult<TokenReviewStatus> {
        self.authorize()?;
        let inner = self.state.inner.lock();
        Ok(match inner.tokens.get(token) {
            Some(user) => TokenReviewStatus {
                authenticated: true,
                user: Some(user.clone()),
                error: None,
            },
            None => TokenReviewStatus {
                authenticated: false,
                user: None,
                error: None,
            },
        })
    }

    async fn get_resource_definition(&self, name: &str) -> RudderResult<ResourceDefinition> {
        self.authorize()?;
        self.state
            .inner
            .lock()
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| RudderError::NotFound {
                kind: "customresourcedefinition".to_string(),
                name: name.to_string(),
            })
    }

    async fn create_resource_definition(
        &self,
        definition: &ResourceDefinition,
    ) -> RudderResult<ResourceDefinition> {
        self.authorize()?;
        let mut inner = self.state.inner.lock();
        if inner.definitions.contains_key(&definition.name) {
            return Err(RudderError::AlreadyExists {
                kind: "customresourcedefinition".to_string(),
                name: definition.name.clone(),
            });
        }
        inner
            .definitions
            .insert(definition.name.clone(), definition.clone());
        Ok(definition.clone())
    }

    fn resources(&self, resource: ResourceType, namespace: &str) -> Arc<dyn ResourceClient> {
        Arc::new(LocalResources {
            cluster: self.clone(),
            resource,
            namespace: namespace.to_string(),
        })
    }
}

impl ClusterConnector for LocalCluster {
    fn connect(&self, config: &ClientConfig) -> RudderResult<Arc<dyn ClusterClient>> {
        Ok(Arc::new(LocalCluster {
            state: self.state.clone(),
            config: config.clone(),
        }))
    }
}

/// Resource verbs of a [`LocalCluster`].
struct LocalResources {
    cluster: LocalCluster,
    resource: ResourceType,
    namespace: String,
}

impl LocalResources {
    fn key(&self) -> (String, String) {
        (self.resource.key(), self.namespace.clone())
    }

    fn kind(&self) -> String {
        self.resource.kind.to_lowercase()
    }

    fn not_found(&self, name: &str) -> RudderError {
        RudderError::NotFound {
            kind: self.kind(),
            name: name.to_string(),
        }
    }

    fn check(&self) -> RudderResult<Option<ResourceDefinition>> {
        self.cluster.authorize()?;
        if !self.resource.is_custom() {
            return Ok(None);
        }
        let name = self.resource.definition_name();
        match self.cluster.state.inner.lock().definitions.get(&name) {
            Some(def) => Ok(Some(def.clone())),
            None => Err(RudderError::NotFound {
                kind: "resource type".to_string(),
                name,
            }),
        }
    }

    fn publish(&self, kind: EventKind, object: &ClusterObject) {
        // No subscribers is not an error.
        let _ = self.cluster.state.events.send(StoredEvent {
            type_key: self.resource.key(),
            namespace: self.namespace.clone(),
            event: WatchEvent::new(kind, object.clone()),
        });
    }
}

#[async_trait]
impl ResourceClient for LocalResources {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> RudderResult<ClusterObject> {
        self.check()?;
        let inner = self.cluster.state.inner.lock();
        inner
            .objects
            .get(&self.key())
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| self.not_found(name))
    }

    async fn list(&self, selector: &LabelSelector) -> RudderResult<Vec<ClusterObject>> {
        self.check()?;
        let inner = self.cluster.state.inner.lock();
        Ok(inner
            .objects
            .get(&self.key())
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| selector.matches(&o.metadata.labels))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, mut object: ClusterObject) -> RudderResult<ClusterObject> {
        self.check()?;
        if object.metadata.name.is_empty() {
            return Err(RudderError::invalid_request("object name is required"));
        }
        let mut inner = self.cluster.state.inner.lock();
        inner.revision += 1;
        let revision = inner.revision;
        let objects = inner.objects.entry(self.key()).or_default();
        if objects.contains_key(&object.metadata.name) {
            return Err(RudderError::AlreadyExists {
                kind: self.kind(),
                name: object.metadata.name,
            });
        }
        object.metadata.namespace = self.namespace.clone();
        object.metadata.resource_version = revision.to_string();
        objects.insert(object.metadata.name.clone(), object.clone());
        self.publish(EventKind::Added, &object);
        Ok(object)
    }

    async fn update(&self, mut object: ClusterObject) -> RudderResult<ClusterObject> {
        let definition = self.check()?;
        let mut inner = self.cluster.state.inner.lock();
        inner.revision += 1;
        let revision = inner.revision;
        let stored = inner
            .objects
            .get_mut(&self.key())
            .and_then(|objects| objects.get_mut(&object.metadata.name))
            .ok_or_else(|| self.not_found(&object.metadata.name))?;

        let expected = &object.metadata.resource_version;
        if !expected.is_empty() && *expected != stored.metadata.resource_version {
            return Err(RudderError::conflict(format!(
                "the object has been modified; resource version {} does not match {}",
                expected, stored.metadata.resource_version
            )));
        }

        // With a status subresource, status is only written through update_status.
        if definition.is_some_and(|d| d.status_subresource) {
            match stored.body.get("status") {
                Some(status) => {
                    object.body.insert("status".to_string(), status.clone());
                }
                None => {
                    object.body.remove("status");
                }
            }
        }

        object.metadata.namespace = self.namespace.clone();
        object.metadata.resource_version = revision.to_string();
        *stored = object.clone();
        self.publish(EventKind::Modified, &object);
        Ok(object)
    }

    async fn update_status(&self, object: ClusterObject) -> RudderResult<ClusterObject> {
        let definition = self.check()?;
        if !definition.is_some_and(|d| d.status_subresource) {
            return Err(RudderError::NotFound {
                kind: "subresource".to_string(),
                name: format!("{}/status", self.resource.plural),
            });
        }
        let mut inner = self.cluster.state.inner.lock();
        inner.revision += 1;
        let revision = inner.revision;
        let stored = inner
            .objects
            .get_mut(&self.key())
            .and_then(|objects| objects.get_mut(&object.metadata.name))
            .ok_or_else(|| self.not_found(&object.metadata.name))?;

        let expected = &object.metadata.resource_version;
        if !expected.is_empty() && *expected != stored.metadata.resource_version {
            return Err(RudderError::conflict(format!(
                "the object has been modified; resource version {} does not match {}",
                expected, stored.metadata.resource_version
            )));
        }

        match object.body.get("status") {
            Some(status) => {
                stored.body.insert("status".to_string(), status.clone());
            }
            None => {
                stored.body.remove("status");
            }
        }
        stored.metadata.resource_version = revision.to_string();
        let updated = stored.clone();
        self.publish(EventKind::Modified, &updated);
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> RudderResult<()> {
        self.check()?;
        let mut inner = self.cluster.state.inner.lock();
        let removed = inner
            .objects
            .get_mut(&self.key())
            .and_then(|objects| objects.remove(name))
            .ok_or_else(|| self.not_found(name))?;
        self.publish(EventKind::Deleted, &removed);
        Ok(())
    }

    async fn watch(&self, selector: &LabelSelector) -> RudderResult<ObjectWatchStream> {
        self.check()?;
        let rx = self.cluster.state.events.subscribe();
        let filter = (self.resource.key(), self.namespace.clone(), selector.clone());

        let stream = futures::stream::unfold(Some((rx, filter)), |state| async move {
            let (mut rx, filter) = state?;
            loop {
                match rx.recv().await {
                    Ok(stored) => {
                        let (ref type_key, ref namespace, ref selector) = filter;
                        if stored.type_key == *type_key
                            && stored.namespace == *namespace
                            && selector.matches(&stored.event.object.metadata.labels)
                        {
                            return Some((Ok(stored.event), Some((rx, filter))));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "local watch subscriber lagged");
                        return Some((Err(RudderError::watch_expired(skipped)), None));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
