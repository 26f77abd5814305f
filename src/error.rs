//! Unified error types for Quiver
//!
//! Every error maps to a stable kind string (see [`QuiverError::kind`]) so that an
//! outer transport layer can translate it without matching on messages.

use crate::storage::StorageError;
use crate::wal::entry::WalError;

/// Main error type for Quiver operations
#[derive(Debug, thiserror::Error)]
pub enum QuiverError {
    /// Malformed request shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A single add/upsert call repeats an id
    #[error("Expected IDs to be unique, found duplicates of: {}", .ids.join(", "))]
    DuplicateId { ids: Vec<String> },

    /// Embedding length disagrees with the collection's pinned dimensionality
    #[error("Embedding dimension {actual} does not match collection dimensionality {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Collection (or other scoped resource) does not exist
    #[error("{0} does not exist")]
    NotFound(String),

    /// Collection name already taken in this scope
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Raised by the authentication layer wrapping the engine
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Raised by the authorization layer wrapping the engine
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Raised by quota enforcement wrapping the engine
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Raised by rate limiting wrapping the engine
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The call was cancelled cooperatively before it completed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Write-ahead log errors
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Index operation errors
    #[error("Index error: {0}")]
    Index(String),

    /// Index and record store disagree
    #[error("Index inconsistent with record store: {0}")]
    Inconsistent(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encoding or decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quiver operations
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a duplicate id error
    pub fn duplicate_ids(ids: Vec<String>) -> Self {
        Self::DuplicateId { ids }
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an index error
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Stable kind string for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::DuplicateId { .. } => "DuplicateIDError",
            Self::DimensionMismatch { .. } => "InvalidDimension",
            Self::NotFound(_) => "NotFoundError",
            Self::AlreadyExists(_) => "UniqueConstraintError",
            Self::Unauthorized(_) => "AuthorizationError",
            Self::Forbidden(_) => "ForbiddenError",
            Self::QuotaExceeded(_) => "QuotaError",
            Self::RateLimited(_) => "RateLimitError",
            Self::Cancelled(_) => "Cancelled",
            Self::Storage(_) | Self::Io(_) => "StorageError",
            Self::Wal(_) => "WalError",
            Self::Index(_) => "IndexError",
            Self::Inconsistent(_) => "InconsistentIndex",
            Self::Config(_) => "ConfigError",
            Self::Serialization(_) => "SerializationError",
        }
    }

    /// Whether a caller may retry the same call without side effects from this attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Cancelled(_) | Self::RateLimited(_) | Self::Storage(_) | Self::Io(_)
        )
    }
}

impl From<bincode::Error> for QuiverError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for QuiverError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuiverError::dimension_mismatch(384, 128);
        assert_eq!(
            err.to_string(),
            "Embedding dimension 128 does not match collection dimensionality 384"
        );

        let err = QuiverError::duplicate_ids(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "Expected IDs to be unique, found duplicates of: a, b"
        );
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(QuiverError::invalid_argument("x").kind(), "InvalidArgument");
        assert_eq!(QuiverError::duplicate_ids(vec![]).kind(), "DuplicateIDError");
        assert_eq!(QuiverError::dimension_mismatch(2, 3).kind(), "InvalidDimension");
        assert_eq!(QuiverError::not_found("Collection foo").kind(), "NotFoundError");
        assert_eq!(QuiverError::Forbidden("add".into()).kind(), "ForbiddenError");
        assert_eq!(QuiverError::QuotaExceeded("batch".into()).kind(), "QuotaError");
    }

    #[test]
    fn test_retryable() {
        assert!(QuiverError::Cancelled("timeout".into()).is_retryable());
        assert!(QuiverError::RateLimited("slow down".into()).is_retryable());
        assert!(!QuiverError::invalid_argument("bad").is_retryable());
        assert!(!QuiverError::duplicate_ids(vec!["a".into()]).is_retryable());
    }
}
