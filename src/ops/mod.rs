//! Operational concerns.
//!
//! - [`version`] - Server version and client compatibility

pub mod version;
