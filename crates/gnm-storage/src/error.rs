/// Errors from the measurement store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// Serialization failure for the `meta_json` column.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether the error is a transient connectivity problem worth
    /// retrying, as opposed to a schema/auth/query error that will fail
    /// the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Db(e) => matches!(
                e,
                sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_)
            ),
            StorageError::Json(_) => false,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
