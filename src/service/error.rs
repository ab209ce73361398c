use std::fmt;

use thiserror::Error;

use crate::db::StorageError;
use crate::events::{IngestError, ValidationError};
use crate::stream::log::LogStoreError;

/// Stable categories callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    PermissionDenied,
    InvalidArgument,
    Internal,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::InvalidArgument => "invalid_argument",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{error}")]
    Validation {
        /// Position within a batch, when the input was one.
        index: Option<usize>,
        #[source]
        error: ValidationError,
    },
    #[error("{what} `{id}` not found")]
    NotFound { what: &'static str, id: String },
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    LogStore(#[from] LogStoreError),
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl ServiceError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::Validation { .. } => ErrorCategory::Validation,
            ServiceError::NotFound { .. } => ErrorCategory::NotFound,
            ServiceError::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            ServiceError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            ServiceError::Storage(_) | ServiceError::LogStore(_) | ServiceError::Inconsistent(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Field the error refers to, for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ServiceError::Validation { error, .. } => Some(error.field()),
            _ => None,
        }
    }
}

impl From<IngestError> for ServiceError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(error) => ServiceError::Validation { index: None, error },
            IngestError::BatchValidation { index, error } => ServiceError::Validation {
                index: Some(index),
                error,
            },
            IngestError::Storage(err) => ServiceError::Storage(err),
            IngestError::Sequence(err) => ServiceError::LogStore(err),
            err @ IngestError::Inconsistent { .. } => ServiceError::Inconsistent(err.to_string()),
        }
    }
}
