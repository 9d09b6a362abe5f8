//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Component lifecycle
//! - [`error`] - Error types and gRPC status mapping
//! - [`namespace`] - Namespace resolution

pub mod config;
pub mod error;
pub mod namespace;
pub mod runtime;
