//! Shared error type across SessionCast crates.

use thiserror::Error;

/// Stable error codes (used in logs, metrics labels, and HTTP bodies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upgrade request rejected before a connection existed.
    Handshake,
    /// Send to a single connection failed.
    Delivery,
    /// `attach` called twice on the same instance.
    DoubleAttach,
    /// Registry bookkeeping out of step (duplicate id).
    RegistryInconsistency,
    /// Payload or envelope could not be serialized.
    Encode,
    /// Invalid input / invalid configuration.
    BadRequest,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Internal server error.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Handshake => "HANDSHAKE",
            ErrorKind::Delivery => "DELIVERY",
            ErrorKind::DoubleAttach => "DOUBLE_ATTACH",
            ErrorKind::RegistryInconsistency => "REGISTRY_INCONSISTENCY",
            ErrorKind::Encode => "ENCODE",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, SessionCastError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum SessionCastError {
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("attach called more than once")]
    DoubleAttach,
    #[error("registry inconsistency: {0}")]
    RegistryInconsistency(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl SessionCastError {
    /// Map to a stable code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionCastError::Handshake(_) => ErrorKind::Handshake,
            SessionCastError::Delivery(_) => ErrorKind::Delivery,
            SessionCastError::DoubleAttach => ErrorKind::DoubleAttach,
            SessionCastError::RegistryInconsistency(_) => ErrorKind::RegistryInconsistency,
            SessionCastError::Encode(_) => ErrorKind::Encode,
            SessionCastError::BadRequest(_) => ErrorKind::BadRequest,
            SessionCastError::UnsupportedVersion => ErrorKind::UnsupportedVersion,
            SessionCastError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error must stop the caller (structural misuse).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionCastError::DoubleAttach | SessionCastError::UnsupportedVersion
        )
    }
}
