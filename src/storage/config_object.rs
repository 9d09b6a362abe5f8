//! Config map release driver.
//!
//! Each release is one config map named after the release. The spec and
//! status are serialized to JSON, base64 encoded and stored under the
//! `release` data key. Config maps have no status subresource, so status
//! writes replace the whole object.
//!
//! The [`OWNER_LABEL`] label is reserved: releases and selectors that set
//! it are rejected.

use super::cluster_driver::{ClusterDriver, ObjectCodec};
use super::{Release, ReleaseBody};
use crate::cluster::{ClusterObject, LabelSelector, ObjectMeta, ResourceClient};
use crate::core::error::{RudderError, RudderResult};
use base64::Engine;
use serde_json::json;
use std::sync::Arc;

/// Label marking config maps owned by the release store.
pub const OWNER_LABEL: &str = "OWNER";
/// Value of [`OWNER_LABEL`].
pub const OWNER_VALUE: &str = "RUDDER";

const RELEASE_KEY: &str = "release";

/// Config map codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigObjectCodec;

/// Release driver storing config maps.
pub type ConfigObjectDriver = ClusterDriver<ConfigObjectCodec>;

impl ConfigObjectDriver {
    /// Bind to the config maps of one namespace.
    pub fn config_objects(resources: Arc<dyn ResourceClient>) -> Self {
        ClusterDriver::new(resources, ConfigObjectCodec)
    }
}

impl ObjectCodec for ConfigObjectCodec {
    const NAME: &'static str = "config-object";
    const STATUS_SUBRESOURCE: bool = false;

    fn encode(&self, release: &Release) -> RudderResult<ClusterObject> {
        if release.labels().contains_key(OWNER_LABEL) {
            return Err(reserved_label());
        }
        let body = serde_json::to_vec(&ReleaseBody::of(release))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);

        let mut metadata = release.metadata.clone();
        metadata
            .labels
            .insert(OWNER_LABEL.to_string(), OWNER_VALUE.to_string());
        Ok(ClusterObject::new(metadata).with_field("data", json!({ RELEASE_KEY: encoded })))
    }

    fn decode(&self, object: ClusterObject) -> RudderResult<Release> {
        let name = object.metadata.name.clone();
        let encoded = object
            .field("data")
            .and_then(|data| data.get(RELEASE_KEY))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RudderError::internal(format!("config map \"{}\" has no release data", name))
            })?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| {
                RudderError::internal(format!("config map \"{}\" is corrupt: {}", name, e))
            })?;
        let body: ReleaseBody = serde_json::from_slice(&raw)?;

        let mut metadata: ObjectMeta = object.metadata;
        if metadata.labels.get(OWNER_LABEL).map(String::as_str) == Some(OWNER_VALUE) {
            metadata.labels.remove(OWNER_LABEL);
        }
        Ok(body.into_release(metadata))
    }

    fn push_down(&self, selector: &LabelSelector) -> RudderResult<LabelSelector> {
        if selector.requirements().contains_key(OWNER_LABEL) {
            return Err(reserved_label());
        }
        Ok(selector.clone().with(OWNER_LABEL, OWNER_VALUE))
    }
}

fn reserved_label() -> RudderError {
    RudderError::invalid_request(format!("label \"{}\" is reserved", OWNER_LABEL))
}
