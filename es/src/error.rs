//! Store error types

use thiserror::Error;

/// Errors from event store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store corrupted: {0}")]
    Corrupted(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Connection lock poisoned")]
    Poisoned,
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
