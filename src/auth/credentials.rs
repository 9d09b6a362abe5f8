//! Credential verifiers.
//!
//! One verifier per credential kind, all behind [`CredentialVerifier`].
//! [`Authenticator`] owns one of each and dispatches on [`Credential`].

use super::{AuthContext, Credential, PeerInfo};
use crate::cluster::{ClientConfig, ClusterClient, ClusterConnector, UserInfo};
use crate::core::error::{RudderError, RudderResult};
use crate::net::tls::leaf_common_name;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default upper bound on a single verification.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Successful verification: identity plus a client config scoped to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub user: UserInfo,
    pub user_config: ClientConfig,
    pub impersonating: bool,
}

/// Turns raw credential material into a verified identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Material this verifier consumes.
    type Material: Send + 'static;

    /// Verify the material. Nothing is derived on failure.
    async fn verify(&self, material: Self::Material) -> RudderResult<Verified>;
}

/// Verifies TLS client certificates.
///
/// The caller acts through the gateway's own credentials while cluster
/// actions are attributed to the certificate's common name.
#[derive(Debug, Clone)]
pub struct CertificateVerifier {
    system_config: ClientConfig,
}

impl CertificateVerifier {
    pub fn new(system_config: ClientConfig) -> Self {
        Self { system_config }
    }
}

#[async_trait]
impl CredentialVerifier for CertificateVerifier {
    type Material = Option<PeerInfo>;

    async fn verify(&self, peer: Option<PeerInfo>) -> RudderResult<Verified> {
        let peer = peer.ok_or_else(|| RudderError::unauthenticated("no peer found"))?;
        if peer.tls.is_none() {
            return Err(RudderError::unauthenticated("no TLS credential found"));
        }
        let leaf = peer.leaf_certificate().ok_or_else(|| {
            RudderError::unauthenticated("no verified client certificate found")
        })?;
        let common_name = leaf_common_name(leaf).ok_or_else(|| {
            RudderError::unauthenticated("client certificate has no common name")
        })?;

        Ok(Verified {
            user: UserInfo::new(common_name.clone()),
            user_config: self.system_config.impersonating(common_name),
            impersonating: true,
        })
    }
}

/// Verifies bearer tokens through the cluster's token review.
#[derive(Clone)]
pub struct BearerVerifier {
    system: Arc<dyn ClusterClient>,
}

impl BearerVerifier {
    pub fn new(system: Arc<dyn ClusterClient>) -> Self {
        Self { system }
    }
}

#[async_trait]
impl CredentialVerifier for BearerVerifier {
    type Material = String;

    async fn verify(&self, token: String) -> RudderResult<Verified> {
        if token.is_empty() {
            return Err(RudderError::unauthenticated("empty bearer token"));
        }

        let review = self
            .system
            .token_review(&token)
            .await
            .map_err(|e| RudderError::unauthenticated(format!("token review failed: {}", e)))?;
        if !review.authenticated {
            return Err(RudderError::unauthenticated(
                review.error.unwrap_or_else(|| "not authenticated".to_string()),
            ));
        }

        Ok(Verified {
            user: review.user.unwrap_or_default(),
            user_config: self.system.config().with_bearer_token(token),
            impersonating: false,
        })
    }
}

/// Verifies basic credentials with a live probe against the cluster.
#[derive(Clone)]
pub struct BasicVerifier {
    system_config: ClientConfig,
    connector: Arc<dyn ClusterConnector>,
}

impl BasicVerifier {
    pub fn new(system_config: ClientConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            system_config,
            connector,
        }
    }
}

/// Decode a `Basic` payload into `(username, password)`.
pub fn decode_basic(payload: &str) -> RudderResult<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| RudderError::invalid_credentials(format!("malformed basic payload: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| RudderError::invalid_credentials("basic payload is not UTF-8"))?;

    let (username, password) = decoded.split_once(':').unwrap_or(("", ""));
    if username.is_empty() || password.is_empty() {
        return Err(RudderError::invalid_credentials(
            "missing username or password",
        ));
    }
    Ok((username.to_string(), password.to_string()))
}

#[async_trait]
impl CredentialVerifier for BasicVerifier {
    type Material = String;

    async fn verify(&self, payload: String) -> RudderResult<Verified> {
        let (username, password) = decode_basic(&payload)?;
        let user_config = self.system_config.with_basic_auth(username.clone(), password);

        let client = self
            .connector
            .connect(&user_config)
            .map_err(|e| RudderError::unauthenticated(e.to_string()))?;
        client
            .server_version()
            .await
            .map_err(|e| RudderError::unauthenticated(format!("credential probe failed: {}", e)))?;

        Ok(Verified {
            user: UserInfo::new(username),
            user_config,
            impersonating: false,
        })
    }
}

/// Dispatches credentials to their verifier.
#[derive(Clone)]
pub struct Authenticator {
    system_config: ClientConfig,
    certificate: CertificateVerifier,
    bearer: BearerVerifier,
    basic: BasicVerifier,
    timeout: Duration,
}

impl Authenticator {
    /// Build verifiers around the gateway's own client.
    pub fn new(system: Arc<dyn ClusterClient>, connector: Arc<dyn ClusterConnector>) -> Self {
        let system_config = system.config().clone();
        Self {
            certificate: CertificateVerifier::new(system_config.clone()),
            bearer: BearerVerifier::new(system),
            basic: BasicVerifier::new(system_config.clone(), connector),
            system_config,
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Bound every verification to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The gateway's own client config.
    pub fn system_config(&self) -> &ClientConfig {
        &self.system_config
    }

    /// Verify `credential` and build the call's auth context.
    ///
    /// Verification is abandoned when the auth timeout or the call
    /// `deadline`, whichever is earlier, passes.
    pub async fn authenticate(
        &self,
        credential: Credential,
        deadline: Option<Instant>,
    ) -> RudderResult<AuthContext> {
        let scheme = credential.scheme();
        let mut budget_end = Instant::now() + self.timeout;
        if let Some(deadline) = deadline {
            budget_end = budget_end.min(deadline);
        }
        let expired = || RudderError::DeadlineExceeded {
            message: format!("{} verification did not complete in time", scheme),
        };
        if budget_end <= Instant::now() {
            return Err(expired());
        }

        let verification = async {
            match credential {
                Credential::Certificate(peer) => self.certificate.verify(peer).await,
                Credential::Bearer(token) => self.bearer.verify(token).await,
                Credential::Basic(payload) => self.basic.verify(payload).await,
            }
        };

        let verified = tokio::time::timeout_at(budget_end, verification)
            .await
            .map_err(|_| expired())??;

        tracing::debug!(
            scheme,
            user = %verified.user.username,
            impersonating = verified.impersonating,
            "caller authenticated"
        );
        Ok(AuthContext::new(verified, self.system_config.clone()))
    }
}
