//! `Release` custom resource driver.
//!
//! The release spec and status map onto the resource's `spec` and
//! `status` fields. Status writes go through the status subresource.

use super::cluster_driver::{ClusterDriver, ObjectCodec};
use super::{Release, ReleaseSpec, ReleaseStatus};
use crate::cluster::{ClusterObject, ResourceClient};
use crate::core::error::RudderResult;
use serde_json::Value;
use std::sync::Arc;

/// Custom resource codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomResourceCodec;

/// Release driver storing `Release` custom resources.
pub type CustomResourceDriver = ClusterDriver<CustomResourceCodec>;

impl CustomResourceDriver {
    /// Bind to the release resources of one namespace.
    pub fn custom_resources(resources: Arc<dyn ResourceClient>) -> Self {
        ClusterDriver::new(resources, CustomResourceCodec)
    }
}

impl ObjectCodec for CustomResourceCodec {
    const NAME: &'static str = "custom-resource";
    const STATUS_SUBRESOURCE: bool = true;

    fn encode(&self, release: &Release) -> RudderResult<ClusterObject> {
        Ok(ClusterObject::new(release.metadata.clone())
            .with_field("spec", serde_json::to_value(&release.spec)?)
            .with_field("status", serde_json::to_value(&release.status)?))
    }

    fn decode(&self, mut object: ClusterObject) -> RudderResult<Release> {
        let spec: ReleaseSpec = match object.body.remove("spec") {
            Some(Value::Null) | None => ReleaseSpec::default(),
            Some(value) => serde_json::from_value(value)?,
        };
        let status: ReleaseStatus = match object.body.remove("status") {
            Some(Value::Null) | None => ReleaseStatus::default(),
            Some(value) => serde_json::from_value(value)?,
        };
        Ok(Release {
            metadata: object.metadata,
            spec,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterClient, LocalCluster, ResourceDefinition, ResourceType};
    use crate::core::error::RudderError;
    use crate::storage::{ReleaseStore, StatusCode};

    async fn driver() -> CustomResourceDriver {
        let cluster = LocalCluster::new();
        cluster
            .create_resource_definition(&ResourceDefinition::for_type(ResourceType::RELEASES))
            .await
            .unwrap();
        CustomResourceDriver::custom_resources(
            cluster.resources(ResourceType::RELEASES, "default"),
        )
    }

    #[tokio::test]
    async fn test_status_goes_through_subresource() {
        let driver = driver().await;
        let created = driver
            .create(Release::new("web").with_payload(b"v1".to_vec()))
            .await
            .unwrap();

        let mut status_write = created.clone().with_status(StatusCode::Failed, "boom");
        status_write.spec.payload = b"not written".to_vec();
        let updated = driver.update_status(status_write).await.unwrap();
        assert_eq!(updated.status.code, StatusCode::Failed);
        assert_eq!(updated.spec.payload, b"v1");

        // A spec update leaves the recorded status alone.
        let respec = driver
            .update(updated.clone().with_payload(b"v2".to_vec()))
            .await
            .unwrap();
        assert_eq!(respec.status.code, StatusCode::Failed);
        assert_eq!(respec.spec.payload, b"v2");
    }

    #[tokio::test]
    async fn test_errors_name_the_release() {
        let driver = driver().await;
        let err = driver.get("ghost").await.unwrap_err();
        assert_eq!(err, RudderError::release_not_found("ghost"));

        driver.create(Release::new("web")).await.unwrap();
        let err = driver.create(Release::new("web")).await.unwrap_err();
        assert_eq!(err, RudderError::release_exists("web"));
    }
}
