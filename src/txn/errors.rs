//! # Admission Errors
//!
//! Error types for the transaction admission gate.

use crate::model::{GlobalTransactionId, ObjectId, TransactionId};
use thiserror::Error;

/// Result type for admission operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Transaction admission errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Object sync transaction received while this node is the active
    #[error("Object sync transaction {0} received while active")]
    SyncWhileActive(TransactionId),

    /// Parked deltas for an object were not in commit order
    #[error("Change versions for {object} out of order: {previous} then {next}")]
    VersionOutOfOrder {
        object: ObjectId,
        previous: GlobalTransactionId,
        next: GlobalTransactionId,
    },

    /// An object already known locally still had parked deltas
    #[error("Pending changes left for already known {0}")]
    PendingChangesForKnownObject(ObjectId),
}

impl AdmissionError {
    /// Every admission error is a local invariant violation.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = AdmissionError::VersionOutOfOrder {
            object: ObjectId::new(4),
            previous: GlobalTransactionId::new(9),
            next: GlobalTransactionId::new(3),
        };
        let text = err.to_string();
        assert!(text.contains("ObjectID=4"));
        assert!(text.contains("out of order"));
        assert!(err.is_fatal());
    }
}
