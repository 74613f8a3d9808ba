//! Common error types for envsync.

use thiserror::Error;

/// Top-level error type for envsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The operation would overwrite a live environment.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store has no persistence adapter bound yet.
    #[error("Not initialized: {0}")]
    NotInitialized(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
