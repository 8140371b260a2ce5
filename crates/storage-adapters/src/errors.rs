use domains::DomainError;
use thiserror::Error;

/// Adapter-level failures. Never crosses the port boundary: everything is
/// flattened into [`DomainError::StorageUnavailable`].
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("malformed row: {0}")]
    Decode(String),

    #[cfg(feature = "db-postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "storage failure");
        DomainError::StorageUnavailable(err.to_string())
    }
}
