//! Sync State Machine Error Types
//!
//! - Invariant violations are fatal: they mean the protocol desynced locally
//! - An untracked node is not fatal: it was removed while work was queued

use crate::model::NodeId;
use std::fmt;

/// Sync state machine error
#[derive(Debug, Clone)]
pub struct SyncError {
    /// Error kind
    pub kind: SyncErrorKind,
    /// Error message
    pub message: String,
}

/// Sync state machine error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Operation not valid in the node's current state
    IllegalState,

    /// Attempted to move a node's state backwards
    IllegalTransition,

    /// A second batch was requested while one is outstanding
    BatchOutstanding,

    /// A batch was closed that is not the outstanding one
    UnknownBatch,

    /// Node is not (or no longer) tracked
    NodeNotTracked,
}

impl SyncError {
    /// Create a new sync error.
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::IllegalState, message)
    }

    /// Create an illegal transition error.
    pub fn illegal_transition(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::IllegalTransition, message)
    }

    /// Create a batch outstanding error.
    pub fn batch_outstanding(node: NodeId) -> Self {
        Self::new(
            SyncErrorKind::BatchOutstanding,
            format!("batch already outstanding for node {}", node),
        )
    }

    /// Create an unknown batch error.
    pub fn unknown_batch(node: NodeId, sequence: u64) -> Self {
        Self::new(
            SyncErrorKind::UnknownBatch,
            format!("batch {} is not outstanding for node {}", sequence, node),
        )
    }

    /// Create a node not tracked error.
    pub fn node_not_tracked(node: NodeId) -> Self {
        Self::new(
            SyncErrorKind::NodeNotTracked,
            format!("node {} is not tracked", node),
        )
    }

    /// Check if this error is fatal (a local bug, not a remote fault).
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, SyncErrorKind::NodeNotTracked)
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for SyncError {}

/// Result type for sync state machine operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_errors_are_fatal() {
        let node = NodeId::new();
        assert!(SyncError::illegal_state("test").is_fatal());
        assert!(SyncError::illegal_transition("test").is_fatal());
        assert!(SyncError::batch_outstanding(node).is_fatal());
        assert!(SyncError::unknown_batch(node, 3).is_fatal());
    }

    #[test]
    fn test_untracked_node_is_not_fatal() {
        assert!(!SyncError::node_not_tracked(NodeId::new()).is_fatal());
    }

    #[test]
    fn test_display_names_kind() {
        let err = SyncError::unknown_batch(NodeId::new(), 7);
        let text = err.to_string();
        assert!(text.contains("UnknownBatch"));
        assert!(text.contains("batch 7"));
    }
}
