//! Per-call context.
//!
//! A [`CallContext`] starts out as what the transport knows about a call
//! (metadata, peer, deadline). Once the gateway authenticates the caller
//! it is replaced by a derived context carrying the [`AuthContext`].

use crate::auth::{AuthContext, PeerInfo, TlsInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tonic::codegen::http::request::Parts;
use tonic::metadata::MetadataMap;
use tonic::transport::server::{TcpConnectInfo, TlsConnectInfo};

const GRPC_TIMEOUT: &str = "grpc-timeout";

/// What handlers know about the call in flight.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    metadata: Option<MetadataMap>,
    peer: Option<PeerInfo>,
    deadline: Option<Instant>,
    auth: Option<Arc<AuthContext>>,
}

impl CallContext {
    /// Context for a call that arrived with `metadata`.
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            metadata: Some(metadata),
            ..Default::default()
        }
    }

    /// Context for a call the transport attached no metadata to.
    pub fn without_metadata() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Build from an inbound HTTP/2 request.
    pub fn from_http_parts(parts: &Parts) -> Self {
        let metadata = MetadataMap::from_headers(parts.headers.clone());
        let deadline = metadata
            .get(GRPC_TIMEOUT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);

        let mut context = Self::new(metadata);
        context.peer = peer_from_extensions(&parts.extensions);
        context.deadline = deadline;
        context
    }

    pub fn metadata(&self) -> Option<&MetadataMap> {
        self.metadata.as_ref()
    }

    /// ASCII metadata value for `key`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.to_str().ok()
    }

    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Authenticated caller; `None` before the gateway has run.
    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_deref()
    }

    /// Derived context for an authenticated call.
    ///
    /// Keeps the metadata and deadline. The transport peer does not
    /// survive; downstream code sees the caller only through `auth`.
    pub fn authenticated(&self, auth: AuthContext) -> Self {
        Self {
            metadata: self.metadata.clone(),
            peer: None,
            deadline: self.deadline,
            auth: Some(Arc::new(auth)),
        }
    }
}

fn peer_from_extensions(extensions: &tonic::codegen::http::Extensions) -> Option<PeerInfo> {
    if let Some(tls) = extensions.get::<TlsConnectInfo<TcpConnectInfo>>() {
        let chain: Vec<Vec<u8>> = tls
            .peer_certs()
            .map(|certs| certs.iter().map(|c| c.to_vec()).collect())
            .unwrap_or_default();
        let verified_chains = if chain.is_empty() { Vec::new() } else { vec![chain] };
        return Some(PeerInfo {
            addr: tls.get_ref().remote_addr(),
            tls: Some(TlsInfo { verified_chains }),
        });
    }

    extensions
        .get::<TcpConnectInfo>()
        .map(|tcp| PeerInfo {
            addr: tcp.remote_addr(),
            tls: None,
        })
}

/// Parse a `grpc-timeout` value: up to eight digits and a unit.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
