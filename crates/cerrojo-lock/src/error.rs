//! Lock error types

use std::time::Duration;

use cerrojo_store::{SessionId, StoreError};

/// Error type for distributed mutex operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {waited:?} acquiring lock '{path}'")]
    AcquireTimeout { path: String, waited: Duration },

    #[error("session lost while acquiring lock '{path}'")]
    SessionLost { path: String },

    #[error("session '{0}' expired")]
    SessionExpired(SessionId),

    #[error("failed to release lock node '{node}' after {attempts} attempts: {message}")]
    ReleaseFailed {
        node: String,
        attempts: u32,
        message: String,
    },

    #[error("connection loss during {operation} after {attempts} attempts: {message}")]
    ConnectionLoss {
        operation: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    /// Whether the error is a normal contention outcome
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::AcquireTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
