//! # Transport Errors

use crate::model::NodeId;
use thiserror::Error;

/// Result type for group transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Group transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer is not (or no longer) a group member
    #[error("Node not connected: {0}")]
    NotConnected(NodeId),

    /// Message could not be delivered
    #[error("Send to {node} failed: {reason}")]
    SendFailed { node: NodeId, reason: String },

    /// Response did not arrive in time
    #[error("Timed out waiting for {0}")]
    Timeout(NodeId),

    /// Message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),
}

impl TransportError {
    /// Peer the error concerns, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::NotConnected(node) | Self::Timeout(node) => Some(*node),
            Self::SendFailed { node, .. } => Some(*node),
            Self::Codec(_) => None,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
