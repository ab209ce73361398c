use thiserror::Error;

use crate::db::StorageError;
use crate::stream::log::LogStoreError;

use super::types::EventId;
use super::validation::ValidationError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("batch element {index} is invalid: {error}")]
    BatchValidation {
        index: usize,
        #[source]
        error: ValidationError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to assign hand sequence: {0}")]
    Sequence(#[from] LogStoreError),
    /// The dedup table points at an event row that does not exist.
    #[error("idempotency key `{key}` maps to missing event {event_id}")]
    Inconsistent { key: String, event_id: EventId },
}

impl IngestError {
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            IngestError::Validation(error) | IngestError::BatchValidation { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Inconsistent { .. })
    }
}
