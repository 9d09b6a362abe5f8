//! Version check and authentication in front of every call.
//!
//! Unary and streaming calls go through the same sequence:
//!
//! 1. the client version header must be compatible, except for
//!    `GetVersion`, which clients call before they know the server version
//! 2. the call must carry metadata
//! 3. the authorization header selects a credential, which is verified
//! 4. the handler runs with a derived [`CallContext`] holding the
//!    caller's [`AuthContext`](crate::auth::AuthContext)

use super::context::CallContext;
use super::stream::{ContextStream, ServerStream};
use super::{API_CLIENT_HEADER, VERSION_METHOD};
use crate::auth::{Authenticator, Credential, AUTHORIZATION};
use crate::core::error::{RudderError, RudderResult};
use crate::ops::version::VersionInfo;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tonic::Status;

/// Split `/package.Service/Method` into service and method.
pub fn split_method(full_method: &str) -> Option<(&str, &str)> {
    let mut parts = full_method.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(""), Some(service), Some(method), None) => Some((service, method)),
        _ => None,
    }
}

fn is_version_method(full_method: &str) -> bool {
    matches!(split_method(full_method), Some((_, method)) if method == VERSION_METHOD)
}

/// Call counters.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    accepted: AtomicU64,
    version_mismatch: AtomicU64,
    missing_metadata: AtomicU64,
    unauthenticated: AtomicU64,
    deadline_exceeded: AtomicU64,
}

/// Point-in-time copy of [`GatewayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    pub accepted: u64,
    pub version_mismatch: u64,
    pub missing_metadata: u64,
    pub unauthenticated: u64,
    pub deadline_exceeded: u64,
}

impl GatewayMetricsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.version_mismatch + self.missing_metadata + self.unauthenticated + self.deadline_exceeded
    }
}

impl GatewayMetrics {
    fn record(&self, result: &RudderResult<CallContext>) {
        let counter = match result {
            Ok(_) => &self.accepted,
            Err(RudderError::VersionMismatch { .. }) => &self.version_mismatch,
            Err(RudderError::MissingMetadata) => &self.missing_metadata,
            Err(RudderError::DeadlineExceeded { .. }) => &self.deadline_exceeded,
            Err(_) => &self.unauthenticated,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            version_mismatch: self.version_mismatch.load(Ordering::Relaxed),
            missing_metadata: self.missing_metadata.load(Ordering::Relaxed),
            unauthenticated: self.unauthenticated.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
        }
    }
}

/// Authenticating interceptor for unary and streaming calls.
#[derive(Clone)]
pub struct AuthGateway {
    authenticator: Arc<Authenticator>,
    version: Arc<VersionInfo>,
    metrics: Arc<GatewayMetrics>,
}

impl AuthGateway {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self {
            authenticator,
            version: Arc::new(VersionInfo::current()),
            metrics: Arc::new(GatewayMetrics::default()),
        }
    }

    /// Check clients against `version` instead of this build's version.
    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = Arc::new(version);
        self
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Run the check sequence and derive the authenticated context.
    pub async fn authorize(&self, context: &CallContext, method: &str) -> RudderResult<CallContext> {
        let result = self.check(context, method).await;
        self.metrics.record(&result);
        if let Err(ref e) = result {
            tracing::warn!(method, code = e.error_code(), error = %e, "call rejected");
        }
        result
    }

    async fn check(&self, context: &CallContext, method: &str) -> RudderResult<CallContext> {
        if !is_version_method(method) {
            let client = context.header(API_CLIENT_HEADER).unwrap_or_default();
            if !self.version.admits_client(client) {
                return Err(RudderError::VersionMismatch {
                    client: client.to_string(),
                    server: self.version.sem_ver.clone(),
                });
            }
        }

        let metadata = context.metadata().ok_or(RudderError::MissingMetadata)?;
        let authorization = metadata.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let credential = Credential::from_header(authorization, context.peer().cloned())?;

        let auth = self
            .authenticator
            .authenticate(credential, context.deadline())
            .await?;
        Ok(context.authenticated(auth))
    }

    /// Authorize a unary call, then run `handler` with the derived context.
    pub async fn intercept_unary<T, F, Fut>(
        &self,
        context: CallContext,
        method: &str,
        handler: F,
    ) -> Result<T, Status>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let derived = self.authorize(&context, method).await?;
        drop(context);
        handler(derived).await
    }

    /// Authorize a streaming call, then run `handler` over a stream that
    /// reports the derived context. Handler errors are returned unchanged.
    pub async fn intercept_stream<S, F, Fut>(
        &self,
        stream: S,
        method: &str,
        handler: F,
    ) -> Result<(), Status>
    where
        S: ServerStream,
        F: FnOnce(ContextStream<S>) -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        // Streams need not be Sync, so the context is not borrowed across the await.
        let context = stream.context().clone();
        let derived = self.authorize(&context, method).await?;
        drop(context);
        handler(ContextStream::new(stream, derived)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{LocalCluster, UserInfo};
    use tonic::metadata::MetadataMap;

    const METHOD: &str = "/rudder.services.ReleaseService/ListReleases";
    const VERSION: &str = "/rudder.services.ReleaseService/GetVersion";

    fn gateway() -> AuthGateway {
        let cluster = Arc::new(LocalCluster::new().with_token("t0k3n", UserInfo::new("alice")));
        let authenticator = Authenticator::new(cluster.clone(), cluster);
        AuthGateway::new(Arc::new(authenticator)).with_version(VersionInfo::new("v2.1.0"))
    }

    fn call(version: Option<&str>, authorization: Option<&str>) -> CallContext {
        let mut metadata = MetadataMap::new();
        if let Some(v) = version {
            metadata.insert(API_CLIENT_HEADER, v.parse().unwrap());
        }
        if let Some(a) = authorization {
            metadata.insert(AUTHORIZATION, a.parse().unwrap());
        }
        CallContext::new(metadata)
    }

    #[test]
    fn test_split_method() {
        assert_eq!(
            split_method(VERSION),
            Some(("rudder.services.ReleaseService", "GetVersion"))
        );
        assert_eq!(split_method("GetVersion"), None);
        assert_eq!(split_method("/a/b/c"), None);
        assert!(is_version_method(VERSION));
        assert!(!is_version_method(METHOD));
    }

    #[tokio::test]
    async fn test_version_mismatch_except_get_version() {
        let gateway = gateway();
        let context = call(Some("v1.0.0"), Some("Bearer t0k3n"));

        let err = gateway.authorize(&context, METHOD).await.unwrap_err();
        assert!(matches!(err, RudderError::VersionMismatch { .. }));

        let derived = gateway.authorize(&context, VERSION).await.unwrap();
        assert_eq!(derived.auth().unwrap().user.username, "alice");
    }

    #[tokio::test]
    async fn test_missing_metadata() {
        let gateway = gateway();
        let err = gateway
            .authorize(&CallContext::without_metadata(), VERSION)
            .await
            .unwrap_err();
        assert_eq!(err, RudderError::MissingMetadata);
    }

    #[tokio::test]
    async fn test_no_credential_is_unauthenticated() {
        let gateway = gateway();
        let err = gateway
            .authorize(&call(Some("v2.1.0"), None), METHOD)
            .await
            .unwrap_err();
        assert!(matches!(err, RudderError::Unauthenticated { .. }));

        let err = gateway
            .authorize(&call(Some("v2.1.0"), Some("Digest abc")), METHOD)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RudderError::UnknownAuthScheme {
                scheme: "Digest".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unary_handler_sees_derived_context() {
        let gateway = gateway();
        let username = gateway
            .intercept_unary(call(Some("v2.1.0"), Some("Bearer t0k3n")), METHOD, |ctx| async move {
                Ok(ctx.auth().map(|a| a.user.username.clone()))
            })
            .await
            .unwrap();
        assert_eq!(username.as_deref(), Some("alice"));

        let status = gateway
            .intercept_unary(call(Some("v2.1.0"), Some("Bearer nope")), METHOD, |_| async {
                Ok::<_, Status>(())
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(RudderError::code_of(&status), Some("Unauthenticated"));
    }

    #[tokio::test]
    async fn test_metrics() {
        let gateway = gateway();
        let _ = gateway.authorize(&call(Some("v2.1.0"), Some("Bearer t0k3n")), METHOD).await;
        let _ = gateway.authorize(&call(Some("v0.1.0"), None), METHOD).await;
        let _ = gateway.authorize(&call(Some("v2.1.0"), None), METHOD).await;

        let snapshot = gateway.metrics().snapshot();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.version_mismatch, 1);
        assert_eq!(snapshot.unauthenticated, 1);
        assert_eq!(snapshot.rejected(), 2);
    }
}
