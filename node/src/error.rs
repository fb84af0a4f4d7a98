//! Node error types.

use ratekeeper_fx::FxError;
use thiserror::Error;

use crate::state::NodeState;

/// Errors surfaced by the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Node is {0:?}, expected {1:?}")]
    InvalidState(NodeState, NodeState),

    #[error(transparent)]
    Fx(#[from] FxError),
}

impl NodeError {
    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            NodeError::Config(_) => "CONFIGURATION_ERROR",
            NodeError::InvalidState(..) => "NODE_UNAVAILABLE",
            NodeError::Fx(e) => e.error_code(),
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
