//! Networking.
//!
//! - [`tls`] - TLS and mTLS configuration, certificate identity

pub mod tls;
