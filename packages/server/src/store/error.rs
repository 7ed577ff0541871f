use filestore_common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;

/// Errors surfaced by [`FileStore`](super::FileStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("file is too large ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("file type not allowed: {0}")]
    DisallowedType(String),

    #[error("integrity check failed: {0}")]
    IntegrityMismatch(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        StoreError::Internal(format!("metadata store: {err}"))
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => StoreError::NotFound("File content not found".into()),
            StorageError::SizeLimitExceeded { actual, limit } => StoreError::TooLarge {
                size: actual,
                limit,
            },
            other => StoreError::Internal(format!("blob store: {other}")),
        }
    }
}
