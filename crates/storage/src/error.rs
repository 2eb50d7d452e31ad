//! Error types for the storage layer

use experiment_types::ExperimentError;
use thiserror::Error;

/// Result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// The underlying store failed or is unavailable
    #[error("backend error: {0}")]
    Backend(String),

    /// Key rejected by the backend
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// A stored record could not be decoded
    #[error("corrupted record at {key}: {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors from file backed stores
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the stored data itself is unreadable
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

impl From<StorageError> for ExperimentError {
    fn from(err: StorageError) -> Self {
        ExperimentError::Persistence(err.to_string())
    }
}
