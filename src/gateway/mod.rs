//! gRPC front end.
//!
//! - [`interceptor`] - version check and authentication for every call
//! - [`context`] - per-call context, before and after authentication
//! - [`stream`] - server streams and the context-substituting wrapper
//! - [`codec`] - message framing and response bodies
//! - [`proto`] - wire messages
//! - [`service`] - `ReleaseService` handlers and their tonic wrapper
//! - [`server`] - listener with TLS and graceful shutdown

pub mod codec;
pub mod context;
pub mod interceptor;
pub mod proto;
pub mod server;
pub mod service;
pub mod stream;

pub use context::CallContext;
pub use interceptor::{AuthGateway, GatewayMetrics, GatewayMetricsSnapshot};
pub use server::GatewayServer;
pub use service::{ReleaseServer, ReleaseService};
pub use stream::{ContextStream, GrpcServerStream, ServerStream, ServerStreamExt};

/// Metadata key carrying the client's version.
pub const API_CLIENT_HEADER: &str = "x-rudder-api-client";

/// Fully qualified service name.
pub const SERVICE_NAME: &str = "rudder.services.ReleaseService";

/// Version discovery method, exempt from the version check.
pub const VERSION_METHOD: &str = "GetVersion";
