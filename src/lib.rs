//! Rudder - release gateway for a cluster package manager.
//!
//! Rudder accepts release management calls over gRPC, authenticates every
//! caller against the cluster, and persists release records in one of
//! several interchangeable storage backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      gRPC ReleaseService                        │
//! │   GetVersion │ WhoAmI │ Get/List/Install/Update │ WatchReleases │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          AuthGateway                            │
//! │   version check │ credential (cert, bearer, basic) │ deadline   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Storage (ReleaseStore)                    │
//! │   memory │ config-object │ custom-resource │ object-store       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core`] - Configuration, errors, namespace resolution, runtime
//! - [`auth`] - Credentials and verification against the cluster
//! - [`cluster`] - Cluster client contract and the in-process cluster
//! - [`gateway`] - gRPC framing, streams, the auth interceptor, service
//! - [`storage`] - Release records, drivers, and the storage factory
//! - [`net`] - TLS configuration and certificate identity
//! - [`ops`] - Version compatibility
//! - [`cli`] - CLI command implementations

// Core infrastructure
pub mod core;

// Authentication
pub mod auth;

// Cluster collaborator
pub mod cluster;

// gRPC surface
pub mod gateway;

// Release storage
pub mod storage;

// Networking
pub mod net;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, namespace, runtime};
pub use net::tls;
pub use ops::version;
