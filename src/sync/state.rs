//! Per-Node Sync State
//!
//! START → READY_TO_SYNC → SYNC_STARTED → IN_SYNC_PENDING_NOTIFY → IN_SYNC
//!
//! - States are totally ordered
//! - Transitions only move forward (forward skips are allowed)
//! - A node re-enters START only by being removed and added again

use super::errors::{SyncError, SyncResult};
use std::fmt;

/// Replication progress of one passive node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncState {
    /// Registered; waiting for transactions admitted before registration to drain
    Start,
    /// Safe to compute the diff
    ReadyToSync,
    /// Diff computed, batches being shipped
    SyncStarted,
    /// Missing set drained; waiting for in-flight transactions to drain
    InSyncPendingNotify,
    /// Fully synchronized
    InSync,
}

impl SyncState {
    /// Advance to `next`.
    ///
    /// Fails if `next` is not strictly after the current state.
    pub fn advance(self, next: SyncState) -> SyncResult<SyncState> {
        if next > self {
            Ok(next)
        } else {
            Err(SyncError::illegal_transition(format!(
                "cannot move from {} to {}",
                self, next
            )))
        }
    }

    /// Check if a sync is in progress (strictly between READY_TO_SYNC and IN_SYNC).
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::SyncStarted | Self::InSyncPendingNotify)
    }

    /// Check if the node is fully synchronized.
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Self::InSync)
    }

    /// Get state name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::ReadyToSync => "READY_TO_SYNC",
            Self::SyncStarted => "SYNC_STARTED",
            Self::InSyncPendingNotify => "IN_SYNC_PENDING_NOTIFY",
            Self::InSync => "IN_SYNC",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}
