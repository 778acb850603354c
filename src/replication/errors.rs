//! Replication Error Types
//!
//! - Local invariant violations are fatal: the offending path stops
//! - Peer faults are not errors here; the peer is zapped instead
//! - A node removed while work was queued is a cancellation, not a failure

use crate::cluster::TransportError;
use crate::sync::{SyncError, SyncErrorKind};
use crate::txn::AdmissionError;
use std::fmt;

/// Replication error type
#[derive(Debug, Clone)]
pub struct ReplicationError {
    /// Error kind
    pub kind: ReplicationErrorKind,
    /// Error message
    pub message: String,
}

/// Replication error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationErrorKind {
    /// Sync state machine invariant violated
    SyncInvariant,

    /// Node was removed while work for it was queued
    NodeGone,

    /// Admission gate invariant violated
    AdmissionInvariant,

    /// Message could not be delivered
    Transport,

    /// Operation requires a role this node does not have
    WrongRole,

    /// Sequence number did not increase
    SequenceRegression,

    /// Configuration error
    ConfigurationError,
}

impl ReplicationError {
    /// Create a new replication error.
    pub fn new(kind: ReplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a wrong role error.
    pub fn wrong_role(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::WrongRole, message)
    }

    /// Create a sequence regression error.
    pub fn sequence_regression(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::SequenceRegression, message)
    }

    /// Create a configuration error.
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ConfigurationError, message)
    }

    /// Check if this error is fatal (a local bug, not a remote fault).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::SyncInvariant
                | ReplicationErrorKind::AdmissionInvariant
                | ReplicationErrorKind::WrongRole
        )
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicationError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ReplicationError {}

impl From<SyncError> for ReplicationError {
    fn from(err: SyncError) -> Self {
        let kind = match err.kind {
            SyncErrorKind::NodeNotTracked => ReplicationErrorKind::NodeGone,
            _ => ReplicationErrorKind::SyncInvariant,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<TransportError> for ReplicationError {
    fn from(err: TransportError) -> Self {
        Self::new(ReplicationErrorKind::Transport, err.to_string())
    }
}

impl From<AdmissionError> for ReplicationError {
    fn from(err: AdmissionError) -> Self {
        Self::new(ReplicationErrorKind::AdmissionInvariant, err.to_string())
    }
}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;
