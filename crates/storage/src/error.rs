//! Storage error types.

use thiserror::Error;

/// Errors that can occur in the data-access layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted value did not parse back into its domain type.
    #[error("corrupt stored value: {0}")]
    Decode(String),
}

/// Convenience type alias for storage results.
pub type Result<T> = std::result::Result<T, StorageError>;
