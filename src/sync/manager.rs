//! Object State Manager
//!
//! Map of every tracked passive to its sync state machine, behind one
//! coarse lock. The authoritative object set is read before the lock is
//! taken so the object manager is never called with the map locked.

use super::context::SyncProgressContext;
use super::errors::{SyncError, SyncResult};
use super::node_state::{BatchOutcome, DiffSummary, NodeSyncState};
use super::state::SyncState;
use crate::cluster::ObjectManager;
use crate::model::{NodeId, ObjectIdSet, RootNameMapping};
use crate::observability::{log_event_with_fields, Event, SyncMetrics};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tracks the sync progress of every passive.
pub struct ObjectStateManager {
    objects: Arc<dyn ObjectManager>,
    nodes: Mutex<HashMap<NodeId, NodeSyncState>>,
    metrics: Arc<SyncMetrics>,
}

impl ObjectStateManager {
    pub fn new(objects: Arc<dyn ObjectManager>, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            objects,
            nodes: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Register `node` in START with what it reported it already has.
    ///
    /// Returns false if the node is already tracked.
    pub fn add(&self, node: NodeId, known: ObjectIdSet, known_roots: RootNameMapping) -> bool {
        let mut nodes = self.lock();
        if nodes.contains_key(&node) {
            log_event_with_fields(
                Event::NodeAddRejected,
                &[("node", &node.to_string()), ("cause", "already tracked")],
            );
            return false;
        }
        nodes.insert(node, NodeSyncState::new(node, known, known_roots));
        self.metrics.increment_nodes_added();
        log_event_with_fields(Event::NodeAdded, &[("node", &node.to_string())]);
        true
    }

    /// Stop tracking `node`. Idempotent.
    pub fn remove(&self, node: NodeId) -> bool {
        let removed = self.lock().remove(&node).is_some();
        if removed {
            self.metrics.increment_nodes_removed();
            log_event_with_fields(Event::NodeRemoved, &[("node", &node.to_string())]);
        }
        removed
    }

    /// START → READY_TO_SYNC → SYNC_STARTED (or IN_SYNC if nothing is missing).
    ///
    /// Call from the transactions-drained continuation.
    pub fn compute_diff(&self, node: NodeId) -> SyncResult<DiffSummary> {
        let authoritative = self.objects.all_object_ids();
        let roots = self.objects.root_name_mapping();

        let summary = {
            let mut nodes = self.lock();
            let state = nodes
                .get_mut(&node)
                .ok_or_else(|| SyncError::node_not_tracked(node))?;
            state.mark_ready()?;
            state.apply_diff(&authoritative, &roots)?
        };

        self.metrics.increment_diffs_computed();
        log_event_with_fields(
            Event::DiffComputed,
            &[
                ("node", &node.to_string()),
                ("missing", &summary.missing.to_string()),
                ("missing_roots", &summary.missing_roots.to_string()),
                ("state", summary.state.state_name()),
            ],
        );
        if !summary.missing_here.is_empty() {
            log_event_with_fields(
                Event::ObjectsMissingHere,
                &[
                    ("node", &node.to_string()),
                    ("objects", &summary.missing_here.to_string()),
                ],
            );
        }
        Ok(summary)
    }

    /// Hand out the next batch for `node`.
    pub fn next_batch(&self, node: NodeId, count: usize) -> SyncResult<SyncProgressContext> {
        let mut nodes = self.lock();
        nodes
            .get_mut(&node)
            .ok_or_else(|| SyncError::node_not_tracked(node))?
            .next_batch(count)
    }

    /// Close the batch described by `context`.
    ///
    /// A node removed while the batch was in flight yields `Cancelled`.
    pub fn close_batch(
        &self,
        context: SyncProgressContext,
        not_synced: &ObjectIdSet,
        synced_count: usize,
    ) -> SyncResult<BatchOutcome> {
        let node = context.node();
        let mut nodes = self.lock();
        match nodes.get_mut(&node) {
            Some(state) => state.close_batch(context, not_synced, synced_count),
            None => Ok(BatchOutcome::Cancelled),
        }
    }

    /// IN_SYNC_PENDING_NOTIFY → IN_SYNC.
    pub fn mark_in_sync(&self, node: NodeId) -> SyncResult<()> {
        let mut nodes = self.lock();
        nodes
            .get_mut(&node)
            .ok_or_else(|| SyncError::node_not_tracked(node))?
            .mark_in_sync()
    }

    pub fn state_of(&self, node: NodeId) -> Option<SyncState> {
        self.lock().get(&node).map(NodeSyncState::state)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.lock().contains_key(&node)
    }

    /// Objects plus roots still to ship to `node`.
    pub fn missing_count(&self, node: NodeId) -> Option<usize> {
        self.lock().get(&node).map(NodeSyncState::backlog)
    }

    /// Copy of the objects still missing on `node`.
    pub fn missing_snapshot(&self, node: NodeId) -> Option<ObjectIdSet> {
        self.lock().get(&node).map(|state| state.missing().clone())
    }

    pub fn node_count(&self) -> usize {
        self.lock().len()
    }

    /// Tracked nodes, sorted.
    pub fn tracked_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.lock().keys().copied().collect();
        nodes.sort();
        nodes
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, NodeSyncState>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{object_ids, ObjectId};
    use crate::sync::errors::SyncErrorKind;
    use crate::testing::InMemoryObjectManager;

    fn manager(ids: &[u64]) -> ObjectStateManager {
        let objects = Arc::new(InMemoryObjectManager::with_objects(ids.iter().copied()));
        ObjectStateManager::new(objects, Arc::new(SyncMetrics::new()))
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let manager = manager(&[]);
        let node = NodeId::new();
        assert!(manager.add(node, ObjectIdSet::new(), RootNameMapping::new()));
        assert!(!manager.add(node, ObjectIdSet::new(), RootNameMapping::new()));
        assert_eq!(manager.node_count(), 1);
        assert_eq!(manager.state_of(node), Some(SyncState::Start));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let manager = manager(&[]);
        let node = NodeId::new();
        manager.add(node, ObjectIdSet::new(), RootNameMapping::new());

        assert!(manager.remove(node));
        assert!(!manager.remove(node));
        assert!(!manager.remove(NodeId::new()));
        assert_eq!(manager.node_count(), 0);
    }

    #[test]
    fn test_compute_diff_against_object_manager() {
        let manager = manager(&[1, 2, 3, 4, 5]);
        let node = NodeId::new();
        manager.add(node, object_ids([1, 2, 7]), RootNameMapping::new());

        let summary = manager.compute_diff(node).unwrap();
        assert_eq!(summary.missing, 3);
        assert_eq!(summary.missing_here, object_ids([7]));
        assert_eq!(manager.missing_snapshot(node), Some(object_ids([3, 4, 5])));
        assert_eq!(manager.state_of(node), Some(SyncState::SyncStarted));
    }

    #[test]
    fn test_untracked_node_is_not_fatal() {
        let manager = manager(&[1]);
        let err = manager.compute_diff(NodeId::new()).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::NodeNotTracked);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_close_after_removal_is_cancelled() {
        let manager = manager(&[1, 2]);
        let node = NodeId::new();
        manager.add(node, ObjectIdSet::new(), RootNameMapping::new());
        manager.compute_diff(node).unwrap();
        let batch = manager.next_batch(node, 1).unwrap();

        manager.remove(node);
        let outcome = manager.close_batch(batch, &ObjectIdSet::new(), 1).unwrap();
        assert_eq!(outcome, BatchOutcome::Cancelled);
    }

    #[test]
    fn test_full_cycle() {
        let manager = manager(&[10, 11, 12]);
        let node = NodeId::new();
        manager.add(node, ObjectIdSet::new(), RootNameMapping::new());
        manager.compute_diff(node).unwrap();

        let batch = manager.next_batch(node, 2).unwrap();
        let outcome = manager.close_batch(batch, &ObjectIdSet::new(), 2).unwrap();
        assert!(matches!(outcome, BatchOutcome::Remaining { missing: 1, .. }));

        let batch = manager.next_batch(node, 2).unwrap();
        assert!(batch.object_ids().contains(&ObjectId::new(12)));
        let outcome = manager.close_batch(batch, &ObjectIdSet::new(), 1).unwrap();
        assert_eq!(outcome, BatchOutcome::PendingNotify);

        manager.mark_in_sync(node).unwrap();
        assert_eq!(manager.state_of(node), Some(SyncState::InSync));
        assert_eq!(manager.missing_count(node), Some(0));
    }

    #[test]
    fn test_tracked_nodes_sorted() {
        let manager = manager(&[]);
        let a = NodeId::new();
        let b = NodeId::new();
        manager.add(a, ObjectIdSet::new(), RootNameMapping::new());
        manager.add(b, ObjectIdSet::new(), RootNameMapping::new());

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(manager.tracked_nodes(), expected);
        assert!(manager.contains(a));
    }
}
