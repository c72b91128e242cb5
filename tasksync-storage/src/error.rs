//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that fail a whole container operation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store cannot be reached.
    #[error("container unavailable: {0}")]
    Unavailable(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
