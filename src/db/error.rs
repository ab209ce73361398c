use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("idempotency key `{0}` is already mapped")]
    DuplicateIdempotencyKey(String),
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Translate a unique violation on the idempotency table into a typed error.
    pub fn from_idempotency_insert(err: DbErr, key: &str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                Self::DuplicateIdempotencyKey(key.to_string())
            }
            _ => Self::Database(err),
        }
    }
}
