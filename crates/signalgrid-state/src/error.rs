//! Error types for the coordination store.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for coordination store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur talking to the coordination store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("store call {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

impl StateError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StateError::Timeout { .. } | StateError::Transaction(_) | StateError::Read(_)
        )
    }
}
