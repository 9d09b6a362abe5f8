//! Object store providers.
//!
//! Each provider reads only its own settings, and only the ones that are
//! set. Dialing resolves and probes the target container; any failure
//! surfaces as `BackendUnavailable`.

use crate::core::error::{RudderError, RudderResult};
use http::{HeaderMap, HeaderName, HeaderValue};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::http::HttpBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Header carrying the swift auth token.
const SWIFT_AUTH_TOKEN: &str = "x-auth-token";

/// Connection settings for one object store provider.
#[derive(Clone, PartialEq, Eq)]
pub enum ObjectStoreProvider {
    S3 {
        access_key_id: Option<String>,
        secret_key: Option<String>,
        endpoint: Option<String>,
        region: Option<String>,
    },
    Google {
        json_key_path: Option<String>,
        project_id: Option<String>,
    },
    Azure {
        account: Option<String>,
        key: Option<String>,
    },
    Swift {
        key: Option<String>,
        tenant_auth_url: Option<String>,
        tenant_name: Option<String>,
        username: Option<String>,
    },
    /// Process-local store for development and tests.
    Memory,
}

impl ObjectStoreProvider {
    /// Provider name as used in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::S3 { .. } => "s3",
            Self::Google { .. } => "google",
            Self::Azure { .. } => "azure",
            Self::Swift { .. } => "swift",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Debug for ObjectStoreProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        match self {
            Self::S3 {
                access_key_id,
                secret_key,
                endpoint,
                region,
            } => f
                .debug_struct("S3")
                .field("access_key_id", access_key_id)
                .field("secret_key", &redact(secret_key))
                .field("endpoint", endpoint)
                .field("region", region)
                .finish(),
            Self::Google {
                json_key_path,
                project_id,
            } => f
                .debug_struct("Google")
                .field("json_key_path", json_key_path)
                .field("project_id", project_id)
                .finish(),
            Self::Azure { account, key } => f
                .debug_struct("Azure")
                .field("account", account)
                .field("key", &redact(key))
                .finish(),
            Self::Swift {
                key,
                tenant_auth_url,
                tenant_name,
                username,
            } => f
                .debug_struct("Swift")
                .field("key", &redact(key))
                .field("tenant_auth_url", tenant_auth_url)
                .field("tenant_name", tenant_name)
                .field("username", username)
                .finish(),
            Self::Memory => f.write_str("Memory"),
        }
    }
}

/// Object store selection plus the location of release bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreOptions {
    pub provider: ObjectStoreProvider,
    /// Bucket or container name.
    pub container: String,
    /// Key prefix for release bodies.
    pub prefix: String,
}

/// Dial the provider and resolve the container.
pub async fn dial(options: &ObjectStoreOptions) -> RudderResult<Arc<dyn ObjectStore>> {
    if options.container.is_empty() && options.provider != ObjectStoreProvider::Memory {
        return Err(RudderError::unavailable("object store container is required"));
    }

    let store: Arc<dyn ObjectStore> = match &options.provider {
        ObjectStoreProvider::S3 {
            access_key_id,
            secret_key,
            endpoint,
            region,
        } => {
            let mut builder = AmazonS3Builder::new().with_bucket_name(&options.container);
            if let Some(v) = access_key_id {
                builder = builder.with_access_key_id(v);
            }
            if let Some(v) = secret_key {
                builder = builder.with_secret_access_key(v);
            }
            if let Some(v) = endpoint {
                builder = builder.with_endpoint(v).with_allow_http(v.starts_with("http://"));
            }
            if let Some(v) = region {
                builder = builder.with_region(v);
            }
            Arc::new(builder.build().map_err(dial_error)?)
        }
        ObjectStoreProvider::Google {
            json_key_path,
            project_id,
        } => {
            let mut builder =
                GoogleCloudStorageBuilder::new().with_bucket_name(&options.container);
            if let Some(path) = json_key_path {
                std::fs::metadata(path).map_err(|e| {
                    RudderError::unavailable(format!("cannot read json key file {}: {}", path, e))
                })?;
                builder = builder.with_service_account_path(path);
            }
            if let Some(project) = project_id {
                // Bucket names are global; the project only scopes billing.
                tracing::debug!(project = %project, "google project configured");
            }
            Arc::new(builder.build().map_err(dial_error)?)
        }
        ObjectStoreProvider::Azure { account, key } => {
            let mut builder =
                MicrosoftAzureBuilder::new().with_container_name(&options.container);
            if let Some(v) = account {
                builder = builder.with_account(v);
            }
            if let Some(v) = key {
                builder = builder.with_access_key(v);
            }
            Arc::new(builder.build().map_err(dial_error)?)
        }
        ObjectStoreProvider::Swift {
            key,
            tenant_auth_url,
            tenant_name,
            username,
        } => {
            let auth = swift_authenticate(
                tenant_auth_url.as_deref(),
                tenant_name.as_deref(),
                username.as_deref(),
                key.as_deref(),
            )
            .await?;
            return swift_store(&auth, &options.container).await;
        }
        ObjectStoreProvider::Memory => Arc::new(InMemory::new()),
    };

    let probe = if options.prefix.is_empty() {
        None
    } else {
        Some(Path::from(options.prefix.as_str()))
    };
    store
        .list_with_delimiter(probe.as_ref())
        .await
        .map_err(|e| {
            RudderError::unavailable(format!(
                "cannot access container \"{}\": {}",
                options.container, e
            ))
        })?;

    tracing::info!(
        provider = options.provider.kind(),
        container = %options.container,
        "object store ready"
    );
    Ok(store)
}

fn dial_error(e: object_store::Error) -> RudderError {
    RudderError::unavailable(format!("cannot connect to object store: {}", e))
}

/// Result of swift authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwiftAuth {
    pub storage_url: String,
    pub token: String,
}

#[derive(Deserialize)]
struct KeystoneResponse {
    access: KeystoneAccess,
}

#[derive(Deserialize)]
struct KeystoneAccess {
    token: KeystoneToken,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<KeystoneService>,
}

#[derive(Deserialize)]
struct KeystoneToken {
    id: String,
}

#[derive(Deserialize)]
struct KeystoneService {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<KeystoneEndpoint>,
}

#[derive(Deserialize)]
struct KeystoneEndpoint {
    #[serde(rename = "publicURL")]
    public_url: String,
}

/// Authenticate against swift: keystone v2 for `/v2.0` auth URLs,
/// v1 header auth otherwise.
pub async fn swift_authenticate(
    auth_url: Option<&str>,
    tenant_name: Option<&str>,
    username: Option<&str>,
    key: Option<&str>,
) -> RudderResult<SwiftAuth> {
    let auth_url = auth_url
        .ok_or_else(|| RudderError::unavailable("swift tenant auth url is required"))?;
    let username =
        username.ok_or_else(|| RudderError::unavailable("swift username is required"))?;
    let key = key.ok_or_else(|| RudderError::unavailable("swift key is required"))?;
    let client = reqwest::Client::new();

    if auth_url.trim_end_matches('/').ends_with("v2.0") {
        let mut auth = serde_json::json!({
            "passwordCredentials": { "username": username, "password": key }
        });
        if let Some(tenant) = tenant_name {
            auth["tenantName"] = serde_json::Value::String(tenant.to_string());
        }
        let url = format!("{}/tokens", auth_url.trim_end_matches('/'));
        let response = client
            .post(&url)
            .json(&serde_json::json!({ "auth": auth }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RudderError::unavailable(format!("swift authentication failed: {}", e)))?;
        let body: KeystoneResponse = response
            .json()
            .await
            .map_err(|e| RudderError::unavailable(format!("swift authentication failed: {}", e)))?;

        let storage_url = body
            .access
            .service_catalog
            .into_iter()
            .find(|s| s.kind == "object-store")
            .and_then(|s| s.endpoints.into_iter().next())
            .map(|e| e.public_url)
            .ok_or_else(|| RudderError::unavailable("swift catalog has no object-store endpoint"))?;
        return Ok(SwiftAuth {
            storage_url,
            token: body.access.token.id,
        });
    }

    let user = match tenant_name {
        Some(tenant) => format!("{}:{}", tenant, username),
        None => username.to_string(),
    };
    let response = client
        .get(auth_url)
        .header("X-Auth-User", user)
        .header("X-Auth-Key", key)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| RudderError::unavailable(format!("swift authentication failed: {}", e)))?;

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RudderError::unavailable(format!("swift auth response lacks {}", name)))
    };
    Ok(SwiftAuth {
        storage_url: header("x-storage-url")?,
        token: header("x-auth-token")?,
    })
}

async fn swift_store(auth: &SwiftAuth, container: &str) -> RudderResult<Arc<dyn ObjectStore>> {
    let container_url = format!("{}/{}", auth.storage_url.trim_end_matches('/'), container);
    let token = HeaderValue::from_str(&auth.token)
        .map_err(|_| RudderError::unavailable("swift token is not a valid header value"))?;

    reqwest::Client::new()
        .head(&container_url)
        .header(SWIFT_AUTH_TOKEN, token.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            RudderError::unavailable(format!("cannot access container \"{}\": {}", container, e))
        })?;

    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static(SWIFT_AUTH_TOKEN), token);
    let store = HttpBuilder::new()
        .with_url(container_url)
        .with_client_options(ClientOptions::new().with_default_headers(headers))
        .build()
        .map_err(dial_error)?;

    tracing::info!(provider = "swift", container, "object store ready");
    Ok(Arc::new(store))
}
