//! Caller authentication.
//!
//! Every call presents exactly one kind of credential, chosen by the
//! `authorization` header:
//!
//! | header            | credential                          |
//! |-------------------|-------------------------------------|
//! | absent or empty   | verified TLS client certificate     |
//! | `Bearer <token>`  | token submitted for token review    |
//! | `Basic <base64>`  | username/password probed on cluster |
//!
//! Verification turns the credential into an [`AuthContext`] holding the
//! caller's identity and a cluster client config scoped to that caller.

pub mod credentials;

use crate::cluster::{ClientConfig, ClusterClient, ClusterConnector, UserInfo};
use crate::core::error::{RudderError, RudderResult};
use std::net::SocketAddr;
use std::sync::Arc;

pub use credentials::{
    Authenticator, BasicVerifier, BearerVerifier, CertificateVerifier, CredentialVerifier,
    Verified,
};

/// Authorization header name.
pub const AUTHORIZATION: &str = "authorization";

const BEARER_PREFIX: &str = "Bearer ";
const BASIC_PREFIX: &str = "Basic ";

/// Transport-level information about the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote address.
    pub addr: Option<SocketAddr>,
    /// TLS session details, if the connection is TLS.
    pub tls: Option<TlsInfo>,
}

/// TLS session details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// Verified certificate chains, leaf first, DER encoded.
    pub verified_chains: Vec<Vec<Vec<u8>>>,
}

impl PeerInfo {
    /// Peer with a TLS session presenting a single verified chain.
    pub fn with_chain(addr: Option<SocketAddr>, chain: Vec<Vec<u8>>) -> Self {
        Self {
            addr,
            tls: Some(TlsInfo {
                verified_chains: vec![chain],
            }),
        }
    }

    /// Leaf certificate of the first verified chain.
    pub fn leaf_certificate(&self) -> Option<&[u8]> {
        self.tls
            .as_ref()?
            .verified_chains
            .first()?
            .first()
            .map(Vec::as_slice)
    }
}

/// A credential extracted from call metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Verified TLS client certificate (or its absence).
    Certificate(Option<PeerInfo>),
    /// Bearer token, prefix stripped.
    Bearer(String),
    /// Base64 `username:password` payload, prefix stripped.
    Basic(String),
}

impl Credential {
    /// Select a credential from the authorization header value.
    ///
    /// A missing or empty header falls back to the peer certificate.
    pub fn from_header(authorization: Option<&str>, peer: Option<PeerInfo>) -> RudderResult<Self> {
        let header = match authorization {
            Some(h) if !h.is_empty() => h,
            _ => return Ok(Self::Certificate(peer)),
        };

        if let Some(token) = header.strip_prefix(BEARER_PREFIX) {
            return Ok(Self::Bearer(token.to_string()));
        }
        if let Some(payload) = header.strip_prefix(BASIC_PREFIX) {
            return Ok(Self::Basic(payload.to_string()));
        }

        let scheme = header.split_whitespace().next().unwrap_or(header);
        Err(RudderError::UnknownAuthScheme {
            scheme: scheme.to_string(),
        })
    }

    /// Scheme name used in logs and metrics.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Certificate(_) => "certificate",
            Self::Bearer(_) => "bearer",
            Self::Basic(_) => "basic",
        }
    }
}

/// Per-call state derived from a verified credential.
///
/// Lives for the duration of one call and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Verified caller.
    pub user: UserInfo,
    /// Cluster client config narrowed to the caller.
    pub user_config: ClientConfig,
    /// The gateway's own cluster client config.
    pub system_config: ClientConfig,
    /// Whether cluster actions are attributed through impersonation.
    pub impersonating: bool,
}

impl AuthContext {
    /// Build a context from a verifier result.
    pub fn new(verified: Verified, system_config: ClientConfig) -> Self {
        Self {
            user: verified.user,
            user_config: verified.user_config,
            system_config,
            impersonating: verified.impersonating,
        }
    }

    /// Cluster client acting as the caller.
    pub fn user_client(
        &self,
        connector: &dyn ClusterConnector,
    ) -> RudderResult<Arc<dyn ClusterClient>> {
        connector.connect(&self.user_config)
    }

    /// Cluster client acting as the gateway.
    pub fn system_client(
        &self,
        connector: &dyn ClusterConnector,
    ) -> RudderResult<Arc<dyn ClusterClient>> {
        connector.connect(&self.system_config)
    }
}
