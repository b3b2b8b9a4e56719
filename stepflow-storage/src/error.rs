//! Storage error types.

use stepflow_core::StoreError;
use thiserror::Error;

/// Errors from the file-backed store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => StoreError::Io(e),
            StorageError::Json(e) => StoreError::Corruption(e.to_string()),
            StorageError::Corruption(msg) => StoreError::Corruption(msg),
        }
    }
}
