//! Coordinator error types.

use thiserror::Error;

use signalgrid_backpressure::ValidationError;
use signalgrid_core::{ConfigError, InstrumentKey, NodeId};
use signalgrid_state::StateError;

/// Errors surfaced by assignment and service operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Startup wiring is incomplete or the configuration is invalid. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid metrics: {0}")]
    Validation(#[from] ValidationError),

    /// No READY node can take the instrument. Retry later or queue.
    #[error("no available node for instrument {0}")]
    NoAvailableNode(InstrumentKey),

    /// A coordination-store call failed or timed out. Nothing was changed
    /// locally; the caller may retry.
    #[error("coordination store unavailable: {0}")]
    TransientStore(#[from] StateError),

    /// The topology changed under an in-flight assignment.
    #[error("concurrent modification while assigning {0}")]
    ConcurrentModification(InstrumentKey),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The node is registered but OVERLOADED or DRAINING.
    #[error("node not ready: {0}")]
    NodeNotReady(NodeId),
}

impl From<ConfigError> for CoordinatorError {
    fn from(e: ConfigError) -> Self {
        CoordinatorError::Configuration(e.to_string())
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
