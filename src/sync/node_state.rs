//! Per-Node Sync State Machine
//!
//! Owns one passive's replication progress:
//! - What the passive reported it already has
//! - What it is still missing (objects and named roots)
//! - The single outstanding batch, if any
//! - Running totals for progress reporting
//!
//! Not internally synchronized. The protocol guarantees one batch in flight
//! per node; this type enforces it instead of locking for it.

use super::context::SyncProgressContext;
use super::errors::{SyncError, SyncResult};
use super::state::SyncState;
use crate::model::{NodeId, ObjectIdSet, RootNameMapping};

/// Result of computing a node's diff against the authoritative object set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    /// Objects present locally but not on the node (`A \ R`)
    pub missing: usize,
    /// Roots the node does not know by name
    pub missing_roots: usize,
    /// Objects present on the node but not locally (`R \ A`)
    pub missing_here: ObjectIdSet,
    /// State after the diff
    pub state: SyncState,
}

impl DiffSummary {
    /// Units of work still to ship: objects plus roots.
    pub fn backlog(&self) -> usize {
        self.missing + self.missing_roots
    }
}

/// What happened when a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// More objects remain; drive another batch
    Remaining {
        /// Objects and roots still missing
        missing: usize,
        /// Objects folded back from this batch
        resubmitted: usize,
    },
    /// Nothing remains; waiting for in-flight transactions before IN_SYNC
    PendingNotify,
    /// The node was removed while the batch was in flight
    Cancelled,
}

/// Replication progress of one tracked node.
#[derive(Debug)]
pub struct NodeSyncState {
    node: NodeId,
    state: SyncState,
    known: ObjectIdSet,
    known_roots: RootNameMapping,
    missing: ObjectIdSet,
    missing_roots: RootNameMapping,
    total_to_sync: usize,
    total_synced: usize,
    batch_sequence: u64,
    outstanding: Option<u64>,
}

impl NodeSyncState {
    /// Start tracking a node with what it reported it already has.
    pub fn new(node: NodeId, known: ObjectIdSet, known_roots: RootNameMapping) -> Self {
        Self {
            node,
            state: SyncState::Start,
            known,
            known_roots,
            missing: ObjectIdSet::new(),
            missing_roots: RootNameMapping::new(),
            total_to_sync: 0,
            total_synced: 0,
            batch_sequence: 0,
            outstanding: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Objects still to ship.
    pub fn missing(&self) -> &ObjectIdSet {
        &self.missing
    }

    /// Roots still to ship.
    pub fn missing_roots(&self) -> &RootNameMapping {
        &self.missing_roots
    }

    /// Objects plus roots still to ship.
    pub fn backlog(&self) -> usize {
        self.missing.len() + self.missing_roots.len()
    }

    pub fn total_to_sync(&self) -> usize {
        self.total_to_sync
    }

    pub fn total_synced(&self) -> usize {
        self.total_synced
    }

    pub fn has_outstanding_batch(&self) -> bool {
        self.outstanding.is_some()
    }

    /// START → READY_TO_SYNC.
    ///
    /// Called once every transaction admitted before the node was registered
    /// has been applied.
    pub fn mark_ready(&mut self) -> SyncResult<()> {
        self.require(SyncState::Start, "mark ready")?;
        self.state = self.state.advance(SyncState::ReadyToSync)?;
        Ok(())
    }

    /// Compute `missing = A \ R` and `missing_here = R \ A`.
    ///
    /// READY_TO_SYNC → SYNC_STARTED, or straight to IN_SYNC when nothing is
    /// missing. The reported set is released afterwards.
    pub fn apply_diff(
        &mut self,
        authoritative: &ObjectIdSet,
        roots: &RootNameMapping,
    ) -> SyncResult<DiffSummary> {
        self.require(SyncState::ReadyToSync, "compute diff")?;

        let known = std::mem::take(&mut self.known);
        let known_roots = std::mem::take(&mut self.known_roots);

        self.missing = authoritative.difference(&known);
        self.missing_roots = roots.without_names_of(&known_roots);
        self.total_to_sync = self.missing.len();

        let next = if self.backlog() == 0 {
            SyncState::InSync
        } else {
            SyncState::SyncStarted
        };
        self.state = self.state.advance(next)?;

        Ok(DiffSummary {
            missing: self.missing.len(),
            missing_roots: self.missing_roots.len(),
            missing_here: known.difference(authoritative),
            state: self.state,
        })
    }

    /// Hand out the next batch of at most `count` objects.
    ///
    /// Roots go first: up to `count` unresolved roots ride along and their
    /// objects fill the batch before the rest of the missing set, which is
    /// drained smallest id first.
    pub fn next_batch(&mut self, count: usize) -> SyncResult<SyncProgressContext> {
        self.require(SyncState::SyncStarted, "request batch")?;
        if self.outstanding.is_some() {
            return Err(SyncError::batch_outstanding(self.node));
        }
        let count = count.max(1);

        let roots = self.missing_roots.take_first(count);
        let mut batch = ObjectIdSet::new();
        for id in roots.object_ids() {
            if batch.len() < count && self.missing.remove(&id) {
                batch.insert(id);
            }
        }
        let room = count - batch.len();
        batch.extend_from(&self.missing.drain_first(room));

        self.batch_sequence += 1;
        self.outstanding = Some(self.batch_sequence);

        Ok(SyncProgressContext::new(
            self.node,
            self.batch_sequence,
            batch,
            roots,
            self.backlog() > 0,
            self.total_to_sync,
            self.total_synced,
        ))
    }

    /// Close the outstanding batch.
    ///
    /// Objects of the batch listed in `not_synced` go back into the missing
    /// set, as do roots whose object was not delivered. When nothing remains
    /// the node moves to IN_SYNC_PENDING_NOTIFY.
    pub fn close_batch(
        &mut self,
        context: SyncProgressContext,
        not_synced: &ObjectIdSet,
        synced_count: usize,
    ) -> SyncResult<BatchOutcome> {
        if context.node() != self.node || self.outstanding != Some(context.sequence()) {
            return Err(SyncError::unknown_batch(self.node, context.sequence()));
        }
        self.require(SyncState::SyncStarted, "close batch")?;

        let resubmit = context.object_ids().intersection(not_synced);
        self.missing.extend_from(&resubmit);
        for (name, id) in context.roots().iter() {
            if not_synced.contains(&id) {
                self.missing_roots.insert(name, id);
            }
        }
        self.total_synced += synced_count;
        self.outstanding = None;

        if self.backlog() == 0 {
            self.state = self.state.advance(SyncState::InSyncPendingNotify)?;
            Ok(BatchOutcome::PendingNotify)
        } else {
            Ok(BatchOutcome::Remaining {
                missing: self.backlog(),
                resubmitted: resubmit.len(),
            })
        }
    }

    /// IN_SYNC_PENDING_NOTIFY → IN_SYNC.
    pub fn mark_in_sync(&mut self) -> SyncResult<()> {
        self.require(SyncState::InSyncPendingNotify, "mark in sync")?;
        self.state = self.state.advance(SyncState::InSync)?;
        Ok(())
    }

    fn require(&self, expected: SyncState, operation: &str) -> SyncResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::illegal_state(format!(
                "cannot {} for node {} in state {} (expected {})",
                operation, self.node, self.state, expected
            )))
        }
    }
}
