//! Error types and gRPC status mapping.
//!
//! Every error surfaced to a caller carries a stable identifier (see
//! [`RudderError::error_code`]) that is attached to the returned status as
//! the `x-rudder-error` metadata entry, so clients can branch on the kind
//! without parsing messages.

use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

/// Metadata key carrying the stable error identifier on failed calls.
pub const ERROR_CODE_METADATA: &str = "x-rudder-error";

/// Common Rudder error conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RudderError {
    /// The call arrived without any transport metadata.
    #[error("missing metadata in call context")]
    MissingMetadata,

    /// The authorization header uses a scheme we do not understand.
    #[error("unknown authorization scheme: {scheme}")]
    UnknownAuthScheme { scheme: String },

    /// The credential could not be verified.
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// The credential is malformed.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// Client and server versions are not compatible.
    #[error("incompatible versions client: {client} server: {server}")]
    VersionMismatch { client: String, server: String },

    /// Object does not exist.
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// Object already exists.
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic concurrency check failed.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A backend could not be reached.
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// The call deadline passed before the operation completed.
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded { message: String },

    /// Invalid request.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RudderError {
    /// Create an Unauthenticated error.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Create an InvalidCredentials error.
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    /// Create a NotFound error for a release.
    pub fn release_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "release".to_string(),
            name: name.into(),
        }
    }

    /// Create an AlreadyExists error for a release.
    pub fn release_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: "release".to_string(),
            name: name.into(),
        }
    }

    /// Create a Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// A watch fell behind and `skipped` events were lost.
    pub fn watch_expired(skipped: u64) -> Self {
        Self::conflict(format!(
            "watch expired: {} events were dropped, re-list and watch again",
            skipped
        ))
    }

    /// Create a BackendUnavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable identifier for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingMetadata => "MissingMetadata",
            Self::UnknownAuthScheme { .. } => "UnknownAuthScheme",
            Self::Unauthenticated { .. } => "Unauthenticated",
            Self::InvalidCredentials { .. } => "InvalidCredentials",
            Self::VersionMismatch { .. } => "VersionMismatch",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Conflict { .. } => "Conflict",
            Self::BackendUnavailable { .. } => "BackendUnavailable",
            Self::DeadlineExceeded { .. } => "DeadlineExceeded",
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::Internal { .. } => "Internal",
        }
    }

    /// gRPC status code for this error.
    pub fn grpc_code(&self) -> Code {
        match self {
            Self::MissingMetadata => Code::Unauthenticated,
            Self::UnknownAuthScheme { .. } => Code::Unauthenticated,
            Self::Unauthenticated { .. } => Code::Unauthenticated,
            Self::InvalidCredentials { .. } => Code::Unauthenticated,
            Self::VersionMismatch { .. } => Code::FailedPrecondition,
            Self::NotFound { .. } => Code::NotFound,
            Self::AlreadyExists { .. } => Code::AlreadyExists,
            Self::Conflict { .. } => Code::Aborted,
            Self::BackendUnavailable { .. } => Code::Unavailable,
            Self::DeadlineExceeded { .. } => Code::DeadlineExceeded,
            Self::InvalidRequest { .. } => Code::InvalidArgument,
            Self::Internal { .. } => Code::Internal,
        }
    }

    /// Check if this error came from the authentication layer.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingMetadata
                | Self::UnknownAuthScheme { .. }
                | Self::Unauthenticated { .. }
                | Self::InvalidCredentials { .. }
        )
    }

    /// Check if the caller may retry after re-reading state.
    ///
    /// The server never retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::BackendUnavailable { .. }
        )
    }

    /// Convert into a tonic status carrying the stable identifier.
    pub fn to_status(&self) -> Status {
        let mut status = Status::new(self.grpc_code(), self.to_string());
        status.metadata_mut().insert(
            ERROR_CODE_METADATA,
            MetadataValue::from_static(self.error_code()),
        );
        status
    }

    /// Recover a RudderError kind from a status produced by [`Self::to_status`].
    pub fn code_of(status: &Status) -> Option<&str> {
        status
            .metadata()
            .get(ERROR_CODE_METADATA)
            .and_then(|v| v.to_str().ok())
    }
}

impl From<RudderError> for Status {
    fn from(e: RudderError) -> Self {
        e.to_status()
    }
}

impl From<serde_json::Error> for RudderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("serialization error: {}", e),
        }
    }
}

/// Result type using RudderError.
pub type RudderResult<T> = Result<T, RudderError>;
