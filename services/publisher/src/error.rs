//! Error types for the claim-check publish pipeline.

use thiserror::Error;

/// Errors that can occur while publishing or resolving a claim-check payload
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to classify payload: {0}")]
    Classification(String),

    #[error("Failed to connect to object store at {endpoint}: {message}")]
    StorageConnection { endpoint: String, message: String },

    #[error("Failed to write payload to {target}: {message}")]
    StorageWrite { target: String, message: String },

    #[error("Failed to read payload from {target}: {message}")]
    StorageRead { target: String, message: String },

    #[error("Payload type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Failed to serialize descriptor: {0}")]
    Serialization(String),

    #[error("Failed to publish descriptor to topic {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("No storage route configured for payload kind '{0}'")]
    UnsupportedPayloadKind(String),

    #[error("Invalid publish request: {0}")]
    InvalidRequest(String),

    #[error("Publish cancelled")]
    Cancelled,

    #[error("Publish deadline exceeded")]
    DeadlineExceeded,
}

impl PublishError {
    pub(crate) fn write(target: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PublishError::StorageWrite {
            target: target.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn read(target: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PublishError::StorageRead {
            target: target.into(),
            message: err.to_string(),
        }
    }

    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::StorageConnection { .. }
                | PublishError::Publish { .. }
                | PublishError::DeadlineExceeded
        )
    }
}

pub type Result<T, E = PublishError> = std::result::Result<T, E>;
