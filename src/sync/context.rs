//! Sync Progress Context
//!
//! One context per sync round. It is created by the state machine when a
//! batch is handed out and must be given back, by value, to close the batch.
//! It deliberately does not implement `Clone`.

use crate::model::{NodeId, ObjectIdSet, RootNameMapping};

/// Immutable snapshot of one sync round for one node.
#[derive(Debug, PartialEq, Eq)]
pub struct SyncProgressContext {
    node: NodeId,
    sequence: u64,
    object_ids: ObjectIdSet,
    roots: RootNameMapping,
    more: bool,
    total_to_sync: usize,
    total_synced: usize,
}

impl SyncProgressContext {
    pub(crate) fn new(
        node: NodeId,
        sequence: u64,
        object_ids: ObjectIdSet,
        roots: RootNameMapping,
        more: bool,
        total_to_sync: usize,
        total_synced: usize,
    ) -> Self {
        Self {
            node,
            sequence,
            object_ids,
            roots,
            more,
            total_to_sync,
            total_synced,
        }
    }

    /// Node this batch is for.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Per-node batch sequence, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Objects to transmit in this round.
    pub fn object_ids(&self) -> &ObjectIdSet {
        &self.object_ids
    }

    /// Roots to establish in this round.
    pub fn roots(&self) -> &RootNameMapping {
        &self.roots
    }

    /// Whether anything remained missing after this batch was taken.
    pub fn has_more(&self) -> bool {
        self.more
    }

    /// Size of the backlog when the diff was computed.
    pub fn total_to_sync(&self) -> usize {
        self.total_to_sync
    }

    /// Objects confirmed synced before this batch.
    pub fn total_synced(&self) -> usize {
        self.total_synced
    }

    /// Number of objects in this batch.
    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    /// Check if the batch carries no objects.
    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }
}
