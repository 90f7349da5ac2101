//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store rejected the operation irrecoverably, for example
    /// because the targeted entity was deleted remotely.
    #[error("remote rejected operation: {message}")]
    Rejected {
        /// Why the remote store refused.
        message: String,
    },

    /// Core engine error.
    #[error("core error: {0}")]
    Core(#[from] satchel_core::CoreError),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a permanent remote rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Core(satchel_core::CoreError::StorageFull) => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::rejected("entity deleted").is_retryable());
        assert!(!SyncError::Core(satchel_core::CoreError::StorageFull).is_retryable());
    }

    #[test]
    fn display() {
        let err = SyncError::rejected("entity deleted remotely");
        assert!(err.to_string().contains("entity deleted remotely"));
    }
}
