//! gRPC listener.

use super::service::ReleaseServer;
use crate::core::error::{RudderError, RudderResult};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tonic::transport::server::TcpIncoming;
use tonic::transport::{Server, ServerTlsConfig};

/// Serves [`ReleaseServer`] until shutdown is signalled.
pub struct GatewayServer {
    bind_addr: SocketAddr,
    tls: Option<ServerTlsConfig>,
    service: ReleaseServer,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        service: ReleaseServer,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            tls: None,
            service,
            shutdown_rx,
        }
    }

    /// Serve over TLS. Without it, certificate authentication always fails.
    pub fn with_tls(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    fn router(&self) -> RudderResult<tonic::transport::server::Router> {
        let mut builder = Server::builder();
        if let Some(ref tls) = self.tls {
            builder = builder
                .tls_config(tls.clone())
                .map_err(|e| RudderError::internal(format!("invalid TLS configuration: {}", e)))?;
        }
        Ok(builder.add_service(self.service.clone()))
    }

    /// Bind the configured address and serve.
    pub async fn run(self) -> RudderResult<()> {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            RudderError::unavailable(format!("failed to bind {}: {}", self.bind_addr, e))
        })?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn run_on(self, listener: TcpListener) -> RudderResult<()> {
        let addr = listener.local_addr().unwrap_or(self.bind_addr);
        let incoming = TcpIncoming::from_listener(listener, true, None)
            .map_err(|e| RudderError::internal(format!("listener error: {}", e)))?;
        let router = self.router()?;
        let mut shutdown_rx = self.shutdown_rx;

        tracing::info!(%addr, tls = self.tls.is_some(), "starting release gateway");

        router
            .serve_with_incoming_shutdown(incoming, async move {
                loop {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                tracing::info!("release gateway shutting down");
            })
            .await
            .map_err(|e| RudderError::internal(format!("gRPC server error: {}", e)))?;

        Ok(())
    }
}
