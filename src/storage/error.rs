//! Error types for persistence operations

/// Result type alias for persistence operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while persisting samples
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database connection failed
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// Database query failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Creating the sample table failed
    #[error("failed to prepare storage schema: {0}")]
    SchemaFailed(String),

    /// Sample serialization/deserialization error
    #[error("sample serialization error: {0}")]
    SerializationError(String),

    /// Backend-specific error
    #[error("storage backend error: {0}")]
    BackendError(String),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
