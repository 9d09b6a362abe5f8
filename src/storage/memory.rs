//! Process-local release driver.
//!
//! All state sits behind one mutex. Events are published while the lock
//! is held so subscribers observe writes in commit order; subscribers
//! themselves never take the lock.

use super::{Release, ReleaseEvent, ReleaseStore, ReleaseWatchStream};
use crate::cluster::{EventKind, LabelSelector};
use crate::core::error::{RudderError, RudderResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Buffered events per watch subscriber.
const WATCH_BUFFER: usize = 256;

struct MemoryState {
    revision: u64,
    releases: BTreeMap<String, Release>,
}

/// In-memory release store.
pub struct MemoryDriver {
    namespace: String,
    state: Mutex<MemoryState>,
    events: broadcast::Sender<ReleaseEvent>,
}

impl MemoryDriver {
    pub fn new(namespace: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            namespace: namespace.into(),
            state: Mutex::new(MemoryState {
                revision: 0,
                releases: BTreeMap::new(),
            }),
            events,
        }
    }

    /// Number of stored releases.
    pub fn len(&self) -> usize {
        self.state.lock().releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, kind: EventKind, release: &Release) {
        let _ = self.events.send(ReleaseEvent::new(kind, release.clone()));
    }
}

fn check_revision(expected: &str, stored: &Release) -> RudderResult<()> {
    if !expected.is_empty() && expected != stored.metadata.resource_version {
        return Err(RudderError::conflict(format!(
            "release \"{}\" was modified: resource version {} does not match {}",
            stored.metadata.name, expected, stored.metadata.resource_version
        )));
    }
    Ok(())
}

#[async_trait]
impl ReleaseStore for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> RudderResult<Release> {
        self.state
            .lock()
            .releases
            .get(name)
            .cloned()
            .ok_or_else(|| RudderError::release_not_found(name))
    }

    async fn list(&self, selector: &LabelSelector) -> RudderResult<Vec<Release>> {
        Ok(self
            .state
            .lock()
            .releases
            .values()
            .filter(|r| selector.matches(r.labels()))
            .cloned()
            .collect())
    }

    async fn create(&self, mut release: Release) -> RudderResult<Release> {
        let mut state = self.state.lock();
        if state.releases.contains_key(release.name()) {
            return Err(RudderError::release_exists(release.metadata.name));
        }
        state.revision += 1;
        release.metadata.namespace = self.namespace.clone();
        release.metadata.resource_version = state.revision.to_string();
        state
            .releases
            .insert(release.metadata.name.clone(), release.clone());
        self.publish(EventKind::Added, &release);
        Ok(release)
    }

    async fn update(&self, mut release: Release) -> RudderResult<Release> {
        let mut state = self.state.lock();
        let revision = state.revision + 1;
        let stored = state
            .releases
            .get_mut(release.name())
            .ok_or_else(|| RudderError::release_not_found(release.name()))?;
        check_revision(release.resource_version(), stored)?;

        release.metadata.namespace = self.namespace.clone();
        release.metadata.resource_version = revision.to_string();
        *stored = release.clone();
        state.revision = revision;
        self.publish(EventKind::Modified, &release);
        Ok(release)
    }

    async fn update_status(&self, release: Release) -> RudderResult<Release> {
        let mut state = self.state.lock();
        let revision = state.revision + 1;
        let stored = state
            .releases
            .get_mut(release.name())
            .ok_or_else(|| RudderError::release_not_found(release.name()))?;
        check_revision(release.resource_version(), stored)?;

        stored.status = release.status;
        stored.metadata.resource_version = revision.to_string();
        let updated = stored.clone();
        state.revision = revision;
        self.publish(EventKind::Modified, &updated);
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> RudderResult<()> {
        let mut state = self.state.lock();
        let removed = state
            .releases
            .remove(name)
            .ok_or_else(|| RudderError::release_not_found(name))?;
        self.publish(EventKind::Deleted, &removed);
        Ok(())
    }

    async fn watch(&self, selector: &LabelSelector) -> RudderResult<ReleaseWatchStream> {
        let rx = self.events.subscribe();
        let selector = selector.clone();

        let stream = futures::stream::unfold(Some((rx, selector)), |state| async move {
            let (mut rx, selector) = state?;
            loop {
                match rx.recv().await {
                    Ok(event) if selector.matches(event.release.labels()) => {
                        return Some((Ok(event), Some((rx, selector))));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory watch subscriber lagged");
                        // The sequence has a gap; the subscriber must re-list.
                        return Some((Err(RudderError::watch_expired(skipped)), None));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
