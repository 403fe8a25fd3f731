//! Store error types

use crate::model::SessionId;

/// Error type for coordination store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connection loss: {0}")]
    Connection(String),

    #[error("session '{0}' expired")]
    SessionExpired(SessionId),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("node '{0}' has children")]
    NotEmpty(String),

    #[error("invalid path '{0}'")]
    InvalidPath(String),
}

impl StoreError {
    /// Whether the failure is transient and the call may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
