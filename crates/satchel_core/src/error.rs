//! Error types for the Satchel core engine.

use crate::types::EntryId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The content store is over capacity and eviction could not free
    /// enough space without removing unsynced entries.
    #[error("storage full: eviction could not free enough space")]
    StorageFull,

    /// A stored record failed its integrity check.
    ///
    /// The corrupted record has already been discarded by the time this
    /// error is returned; the rest of the store remains accessible.
    #[error("record corrupt: {id}")]
    RecordCorrupt {
        /// The entry that failed verification.
        id: EntryId,
    },

    /// Entry not found in the content store.
    #[error("entry not found: {id}")]
    NotFound {
        /// The entry ID that was not found.
        id: EntryId,
    },

    /// Mutation not found in the queue.
    #[error("mutation not found: {id}")]
    MutationNotFound {
        /// The mutation ID that was not found.
        id: crate::types::MutationId,
    },

    /// Input was rejected before being stored or queued.
    #[error("validation error: {message}")]
    Validation {
        /// Description of why the input was rejected.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryId;

    #[test]
    fn error_display() {
        let err = CoreError::StorageFull;
        assert_eq!(
            err.to_string(),
            "storage full: eviction could not free enough space"
        );

        let err = CoreError::validation("payload exceeds upload limit");
        assert!(err.to_string().contains("payload exceeds upload limit"));
    }

    #[test]
    fn corrupt_carries_id() {
        let id = EntryId::from_bytes([7u8; 32]);
        let err = CoreError::RecordCorrupt { id };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
