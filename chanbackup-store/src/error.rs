//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while writing backup objects.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("S3 operation failed: {0}")]
    S3(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("invalid store configuration: {0}")]
    Config(String),
}
