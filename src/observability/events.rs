//! Observable events
//!
//! Every protocol step that an operator may need to reconstruct after the
//! fact has a named event. Names are stable and upper snake case.

use std::fmt;

/// Observable events in the object synchronization core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Replication configuration accepted
    ConfigLoaded,

    // Node tracking
    /// Node registered with the sync state machine
    NodeAdded,
    /// Duplicate registration from a peer
    NodeAddRejected,
    /// Node state dropped (disconnect or zap)
    NodeRemoved,

    // Diff and batches
    /// Missing set computed for a node
    DiffComputed,
    /// Peer reports objects the authority does not have
    ObjectsMissingHere,
    /// Batch of objects handed to the transport
    BatchSent,
    /// Objects folded back into the missing set
    BatchResubmitted,
    /// Missing set drained, waiting for in-flight transactions
    SyncPendingNotify,
    /// Node fully in sync
    SyncCompleted,
    /// Queued work dropped because its node left
    SyncCancelled,
    /// Node moved to passive standby
    NodePromoted,

    // Protocol
    /// Object list request received
    ListRequestReceived,
    /// Object list response sent back to the active
    ListResponseSent,
    /// Node queued until the collector can be disabled
    SyncDeferred,
    /// Peer connection severed
    NodeZapped,
    /// Completion acknowledgement received from the active
    SyncAcknowledged,
    /// Message could not be delivered to a peer
    SendFailed,

    // Garbage collection
    /// Collector suppressed
    GcDisabled,
    /// Collector busy, retrying
    GcDisableRetry,
    /// Collector could not be disabled within the attempt budget
    GcDisableFailed,
    /// Collector re-enabled
    GcEnabled,
    /// Collection result sent to the cluster
    GcResultBroadcast,
    /// Remote collection result applied locally
    GcResultApplied,
    /// Remote collection result ignored (this node is authoritative)
    GcResultIgnored,

    // Transaction admission
    /// Sync transaction admitted into the transaction manager
    SyncTxnAdmitted,
    /// Transaction or change dropped by the admission gate
    TxnIgnored,
    /// Transaction reduced to the objects this node knows
    TxnPruned,
    /// Admission mode changed with the node role
    AdmissionModeChanged,

    // Failures
    /// Local invariant violated (FATAL)
    InvariantViolation,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "REPLICATION_CONFIG_LOADED",

            Event::NodeAdded => "SYNC_NODE_ADDED",
            Event::NodeAddRejected => "SYNC_NODE_ADD_REJECTED",
            Event::NodeRemoved => "SYNC_NODE_REMOVED",

            Event::DiffComputed => "SYNC_DIFF_COMPUTED",
            Event::ObjectsMissingHere => "SYNC_OBJECTS_MISSING_HERE",
            Event::BatchSent => "SYNC_BATCH_SENT",
            Event::BatchResubmitted => "SYNC_BATCH_RESUBMITTED",
            Event::SyncPendingNotify => "SYNC_PENDING_NOTIFY",
            Event::SyncCompleted => "SYNC_COMPLETE",
            Event::SyncCancelled => "SYNC_CANCELLED",
            Event::NodePromoted => "SYNC_NODE_PROMOTED",

            Event::ListRequestReceived => "OBJECT_LIST_REQUEST_RECEIVED",
            Event::ListResponseSent => "OBJECT_LIST_RESPONSE_SENT",
            Event::SyncDeferred => "SYNC_DEFERRED_FOR_GC",
            Event::NodeZapped => "NODE_ZAPPED",
            Event::SyncAcknowledged => "SYNC_COMPLETE_ACKNOWLEDGED",
            Event::SendFailed => "PEER_SEND_FAILED",

            Event::GcDisabled => "GC_DISABLED",
            Event::GcDisableRetry => "GC_DISABLE_RETRY",
            Event::GcDisableFailed => "GC_DISABLE_FAILED",
            Event::GcEnabled => "GC_ENABLED",
            Event::GcResultBroadcast => "GC_RESULT_BROADCAST",
            Event::GcResultApplied => "GC_RESULT_APPLIED",
            Event::GcResultIgnored => "GC_RESULT_IGNORED",

            Event::SyncTxnAdmitted => "SYNC_TXN_ADMITTED",
            Event::TxnIgnored => "TXN_IGNORED",
            Event::TxnPruned => "TXN_PRUNED",
            Event::AdmissionModeChanged => "ADMISSION_MODE_CHANGED",

            Event::InvariantViolation => "INVARIANT_VIOLATION",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::InvariantViolation)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake_case() {
        let events = [
            Event::ConfigLoaded,
            Event::NodeAdded,
            Event::NodeAddRejected,
            Event::NodeRemoved,
            Event::DiffComputed,
            Event::ObjectsMissingHere,
            Event::BatchSent,
            Event::BatchResubmitted,
            Event::SyncPendingNotify,
            Event::SyncCompleted,
            Event::SyncCancelled,
            Event::NodePromoted,
            Event::ListRequestReceived,
            Event::ListResponseSent,
            Event::SyncDeferred,
            Event::NodeZapped,
            Event::SyncAcknowledged,
            Event::SendFailed,
            Event::GcDisabled,
            Event::GcDisableRetry,
            Event::GcDisableFailed,
            Event::GcEnabled,
            Event::GcResultBroadcast,
            Event::GcResultApplied,
            Event::GcResultIgnored,
            Event::SyncTxnAdmitted,
            Event::TxnIgnored,
            Event::TxnPruned,
            Event::AdmissionModeChanged,
            Event::InvariantViolation,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        assert!(Event::InvariantViolation.is_fatal());
        assert!(!Event::NodeZapped.is_fatal());
        assert!(!Event::GcDisableFailed.is_fatal());
    }
}
