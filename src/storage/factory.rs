//! Driver selection and bootstrap.
//!
//! [`StoreOptions`] names exactly one driver. [`StorageFactory::open`]
//! provisions whatever the driver needs on the cluster and returns a
//! ready [`Storage`]; any failure is meant to stop startup.

use super::config_object::ConfigObjectDriver;
use super::custom_resource::CustomResourceDriver;
use super::object_store::ObjectStoreDriver;
use super::provider::{self, ObjectStoreOptions, ObjectStoreProvider};
use super::{MemoryDriver, ReleaseStore, Storage};
use crate::cluster::{ClusterClient, ResourceDefinition, ResourceType};
use crate::core::config::StorageConfig;
use crate::core::error::{RudderError, RudderResult};
use std::fmt;
use std::sync::Arc;

/// Driver kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Memory,
    ConfigObject,
    CustomResource,
    ObjectStore,
}

impl StoreKind {
    /// Parse a configured driver name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "memory" => Some(Self::Memory),
            "config-object" => Some(Self::ConfigObject),
            "custom-resource" => Some(Self::CustomResource),
            "object-store" => Some(Self::ObjectStore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::ConfigObject => "config-object",
            Self::CustomResource => "custom-resource",
            Self::ObjectStore => "object-store",
        }
    }

    /// Whether the driver keeps releases in custom resources.
    pub fn needs_resource_definition(&self) -> bool {
        matches!(self, Self::CustomResource | Self::ObjectStore)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The selected driver and its connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOptions {
    Memory,
    ConfigObject,
    CustomResource,
    ObjectStore(ObjectStoreOptions),
}

impl StoreOptions {
    pub fn kind(&self) -> StoreKind {
        match self {
            Self::Memory => StoreKind::Memory,
            Self::ConfigObject => StoreKind::ConfigObject,
            Self::CustomResource => StoreKind::CustomResource,
            Self::ObjectStore(_) => StoreKind::ObjectStore,
        }
    }

    /// Derive options from `[storage]`.
    ///
    /// Only the selected driver's settings are read, and for the object
    /// store only the selected provider's. Empty values count as unset.
    pub fn from_config(config: &StorageConfig) -> RudderResult<Self> {
        let kind = StoreKind::parse(&config.driver).ok_or_else(|| {
            RudderError::invalid_request(format!("unknown storage driver: {}", config.driver))
        })?;

        Ok(match kind {
            StoreKind::Memory => Self::Memory,
            StoreKind::ConfigObject => Self::ConfigObject,
            StoreKind::CustomResource => Self::CustomResource,
            StoreKind::ObjectStore => Self::ObjectStore(ObjectStoreOptions {
                provider: provider_from_config(config)?,
                container: set(&config.container).unwrap_or_default(),
                prefix: set(&config.prefix).unwrap_or_default(),
            }),
        })
    }
}

fn set(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn provider_from_config(config: &StorageConfig) -> RudderResult<ObjectStoreProvider> {
    let name = set(&config.provider).ok_or_else(|| {
        RudderError::invalid_request("object store provider is required")
    })?;

    Ok(match name.as_str() {
        "s3" => ObjectStoreProvider::S3 {
            access_key_id: set(&config.s3_access_key_id),
            secret_key: set(&config.s3_secret_key),
            endpoint: set(&config.s3_endpoint),
            region: set(&config.s3_region),
        },
        "google" => ObjectStoreProvider::Google {
            json_key_path: set(&config.gcs_json_key_path),
            project_id: set(&config.gcs_project_id),
        },
        "azure" => ObjectStoreProvider::Azure {
            account: set(&config.azure_account),
            key: set(&config.azure_key),
        },
        "swift" => ObjectStoreProvider::Swift {
            key: set(&config.swift_key),
            tenant_auth_url: set(&config.swift_tenant_auth_url),
            tenant_name: set(&config.swift_tenant_name),
            username: set(&config.swift_username),
        },
        "memory" => ObjectStoreProvider::Memory,
        other => {
            return Err(RudderError::invalid_request(format!(
                "unknown object store provider: {}",
                other
            )))
        }
    })
}

/// Builds the release store for one namespace.
pub struct StorageFactory {
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
}

impl StorageFactory {
    /// `cluster` must carry the system credentials.
    pub fn new(cluster: Arc<dyn ClusterClient>, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Provision and construct the selected driver.
    pub async fn open(&self, options: &StoreOptions) -> RudderResult<Storage> {
        let kind = options.kind();
        tracing::info!(driver = %kind, namespace = %self.namespace, "opening release storage");

        if kind != StoreKind::Memory {
            self.cluster.server_version().await.map_err(|e| {
                RudderError::unavailable(format!("cluster unreachable: {}", e))
            })?;
        }
        if kind.needs_resource_definition() {
            self.ensure_resource().await?;
        }

        let driver: Arc<dyn ReleaseStore> = match options {
            StoreOptions::Memory => Arc::new(MemoryDriver::new(self.namespace.clone())),
            StoreOptions::ConfigObject => Arc::new(ConfigObjectDriver::config_objects(
                self.cluster
                    .resources(ResourceType::CONFIG_MAPS, &self.namespace),
            )),
            StoreOptions::CustomResource => Arc::new(CustomResourceDriver::custom_resources(
                self.cluster.resources(ResourceType::RELEASES, &self.namespace),
            )),
            StoreOptions::ObjectStore(store_options) => {
                if let ObjectStoreProvider::Google {
                    project_id: Some(project),
                    ..
                } = &store_options.provider
                {
                    tracing::info!(project = %project, "using google cloud storage project");
                }
                let store = provider::dial(store_options).await?;
                tracing::info!(
                    provider = store_options.provider.kind(),
                    container = %store_options.container,
                    prefix = %store_options.prefix,
                    "object store resolved"
                );
                Arc::new(ObjectStoreDriver::new(
                    self.cluster.resources(ResourceType::RELEASES, &self.namespace),
                    store,
                    store_options.prefix.clone(),
                ))
            }
        };

        Ok(Storage::new(driver))
    }

    /// Register the release resource type unless it already is.
    pub async fn ensure_resource(&self) -> RudderResult<()> {
        let definition = ResourceDefinition::for_type(ResourceType::RELEASES);
        match self.cluster.get_resource_definition(&definition.name).await {
            Ok(_) => return Ok(()),
            Err(RudderError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        match self.cluster.create_resource_definition(&definition).await {
            Ok(_) => {
                tracing::info!(definition = %definition.name, "registered release resource");
                Ok(())
            }
            // Lost the race to another instance.
            Err(RudderError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::storage::Release;

    #[test]
    fn test_from_config_reads_only_selected_provider() {
        let config = StorageConfig {
            driver: "object-store".to_string(),
            provider: Some("azure".to_string()),
            container: Some("releases".to_string()),
            prefix: Some(String::new()),
            azure_account: Some("acct".to_string()),
            azure_key: Some(String::new()),
            s3_region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        let options = StoreOptions::from_config(&config).unwrap();
        assert_eq!(
            options,
            StoreOptions::ObjectStore(ObjectStoreOptions {
                provider: ObjectStoreProvider::Azure {
                    account: Some("acct".to_string()),
                    key: None,
                },
                container: "releases".to_string(),
                prefix: String::new(),
            })
        );
    }

    #[test]
    fn test_from_config_ignores_unselected_fields() {
        let config = StorageConfig {
            driver: "config-object".to_string(),
            provider: Some("not-a-provider".to_string()),
            ..Default::default()
        };
        assert_eq!(
            StoreOptions::from_config(&config).unwrap(),
            StoreOptions::ConfigObject
        );
    }

    #[test]
    fn test_unknown_provider() {
        let config = StorageConfig {
            driver: "object-store".to_string(),
            provider: Some("ftp".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            StoreOptions::from_config(&config),
            Err(RudderError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_ensure_resource_is_idempotent() {
        let cluster = Arc::new(LocalCluster::new());
        let factory = StorageFactory::new(cluster.clone(), "default");
        factory.ensure_resource().await.unwrap();
        factory.ensure_resource().await.unwrap();
        assert!(cluster.has_definition("releases.rudder.io"));
    }

    #[tokio::test]
    async fn test_open_each_kind() {
        let cluster = Arc::new(LocalCluster::new());
        let factory = StorageFactory::new(cluster.clone(), "apps");
        let kinds = [
            StoreOptions::Memory,
            StoreOptions::ConfigObject,
            StoreOptions::CustomResource,
            StoreOptions::ObjectStore(ObjectStoreOptions {
                provider: ObjectStoreProvider::Memory,
                container: String::new(),
                prefix: "releases".to_string(),
            }),
        ];
        for options in kinds {
            let storage = factory.open(&options).await.unwrap();
            assert_eq!(storage.driver_name(), options.kind().as_str());
            assert_eq!(storage.namespace(), "apps");

            let created = storage.create(Release::new("web")).await.unwrap();
            assert_eq!(created.namespace(), "apps");
            assert_eq!(storage.get("web").await.unwrap().name(), "web");
        }
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_fatal() {
        let cluster = Arc::new(LocalCluster::new());
        cluster.set_reachable(false);
        let factory = StorageFactory::new(cluster, "default");

        assert!(factory.open(&StoreOptions::Memory).await.is_ok());
        let err = factory.open(&StoreOptions::CustomResource).await.err().unwrap();
        assert!(matches!(err, RudderError::BackendUnavailable { .. }));
    }
}
