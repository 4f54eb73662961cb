//! Database store error types.

use thiserror::Error;

/// Content store operation errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Statement resources or store settings are missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The content table could not be created.
    #[error("failed to create table {table}: {source}")]
    StorageInitialization {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload stream ended before the declared size was read.
    #[error("payload for {key} truncated: expected {expected} bytes, got {actual}")]
    PayloadTruncated {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Core(#[from] binstore_core::Error),
}

impl DatabaseError {
    /// Whether the error aborts store initialization rather than a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::StorageInitialization { .. }
        )
    }
}

/// Result type for database store operations.
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;
