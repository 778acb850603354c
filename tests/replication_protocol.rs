//! Replication Protocol Tests
//!
//! End-to-end behaviour of the active/passive object sync protocol:
//! - A passive with a partial object set is brought up to date
//! - Dirty or unexpected members are severed
//! - Split-brain is detected on list requests
//! - Passives answer, admit and acknowledge what the active sends

use objsync::cluster::{ClusterMessage, ZapReason};
use objsync::gc::{CollectionInfo, CollectorKind, GcResult};
use objsync::model::{object_ids, NodeId, ObjectId, ObjectIdSet, TransactionId};
use objsync::replication::ReplicationErrorKind;
use objsync::sync::SyncState;
use objsync::testing::TestCluster;
use objsync::txn::{Change, ObjectSyncPayload};
use std::collections::BTreeSet;

/// Delivers recorded unicasts between an active and a passive endpoint.
struct Link {
    active: TestCluster,
    active_id: NodeId,
    passive: TestCluster,
    passive_id: NodeId,
    to_passive: usize,
    to_active: usize,
}

impl Link {
    fn new(active: TestCluster, passive: TestCluster) -> Self {
        Self {
            active,
            active_id: NodeId::new(),
            passive,
            passive_id: NodeId::new(),
            to_passive: 0,
            to_active: 0,
        }
    }

    /// Deliver everything sent so far, in both directions, until quiet.
    fn pump(&mut self) {
        loop {
            self.active.settle();
            self.passive.settle();

            let outbound = self.active.transport.sent_to(self.passive_id);
            let inbound = self.passive.transport.sent_to(self.active_id);
            if outbound.len() == self.to_passive && inbound.len() == self.to_active {
                return;
            }

            for message in outbound.into_iter().skip(self.to_passive) {
                self.to_passive += 1;
                self.passive
                    .manager
                    .on_message(self.active_id, message)
                    .unwrap();
            }
            for message in inbound.into_iter().skip(self.to_active) {
                self.to_active += 1;
                self.active
                    .manager
                    .on_message(self.passive_id, message)
                    .unwrap();
            }
        }
    }
}

fn ids(raw: &[u64]) -> ObjectIdSet {
    object_ids(raw.iter().copied())
}

// =============================================================================
// Bringing a passive up to date
// =============================================================================

/// Partial passive: three objects missing, one root, batch size three.
#[test]
fn test_partial_passive_drains_to_in_sync() {
    let mut cluster = TestCluster::active_with_batch(&[1, 2, 3, 4, 5], 3);
    cluster.objects.add_root("root", 1);
    let node = NodeId::new();

    cluster.manager.on_list_response(node, ids(&[1, 2]), true);
    cluster.transactions.drain();

    assert_eq!(cluster.manager.state().state_of(node), Some(SyncState::SyncStarted));
    assert_eq!(cluster.manager.state().missing_snapshot(node), Some(ids(&[3, 4, 5])));
    assert!(cluster.collector.is_disabled());

    assert_eq!(cluster.handler.drain_pending(), 1);
    let batches = cluster.transport.object_syncs_to(node);
    assert_eq!(batches.len(), 1);
    let (first, deleted) = &batches[0];
    let shipped: Vec<u64> = first.changes.iter().map(|c| c.object_id.as_u64()).collect();
    assert_eq!(shipped, vec![3, 4, 5]);
    assert_eq!(first.roots.get("root"), Some(ObjectId::new(1)));
    assert!(deleted.is_empty());
    assert_eq!(
        cluster.manager.state().state_of(node),
        Some(SyncState::InSyncPendingNotify)
    );
    assert_eq!(cluster.manager.state().missing_count(node), Some(0));

    cluster.settle();
    assert_eq!(cluster.manager.state().state_of(node), Some(SyncState::InSync));
    assert_eq!(cluster.transport.sync_completed_to(node), vec![1]);
    assert_eq!(cluster.state.promoted(), vec![node]);
    assert!(!cluster.collector.is_disabled());
    assert!(cluster.transport.zaps().is_empty());
}

/// Active and passive endpoints talking through recorded messages.
#[test]
fn test_two_endpoints_converge() {
    let active = TestCluster::active_with_batch(&[1, 2, 3, 4, 5, 6, 7], 2);
    let passive = TestCluster::passive(&[1, 2]);
    let mut link = Link::new(active, passive);

    link.active.manager.query(link.passive_id).unwrap();
    link.pump();

    let applied: BTreeSet<u64> = link.passive.applier.applied_objects();
    assert_eq!(applied, [3, 4, 5, 6, 7].into_iter().collect());
    assert_eq!(link.passive.state.sync_completed_count(), 1);
    assert_eq!(link.active.state.promoted(), vec![link.passive_id]);
    assert_eq!(
        link.active.manager.state().state_of(link.passive_id),
        Some(SyncState::InSync)
    );
    assert!(link.active.transport.zaps().is_empty());
    assert!(link.passive.transport.zaps().is_empty());
}

/// Objects deleted between diff and batch travel as deleted ids.
#[test]
fn test_vanished_objects_ship_as_deleted() {
    let mut cluster = TestCluster::active_with_batch(&[1, 2, 3], 10);
    let node = NodeId::new();
    cluster.manager.on_list_response(node, ObjectIdSet::new(), true);
    cluster.transactions.drain();

    cluster.objects.delete_objects(&ids(&[2]));
    cluster.settle();

    let batches = cluster.transport.object_syncs_to(node);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1, ids(&[2]));
    assert_eq!(batches[0].0.changes.len(), 2);
    assert_eq!(cluster.manager.state().state_of(node), Some(SyncState::InSync));
}

// =============================================================================
// Severing misbehaving members
// =============================================================================

/// A passive with state from an earlier run is severed and never tracked.
#[test]
fn test_dirty_database_is_severed() {
    let mut cluster = TestCluster::active(&[1, 2]);
    let node = NodeId::new();

    cluster.manager.on_list_response(node, ids(&[1]), false);
    cluster.settle();

    let zaps = cluster.transport.zaps();
    assert_eq!(zaps.len(), 1);
    assert_eq!(zaps[0].0, node);
    assert_eq!(zaps[0].1, ZapReason::NodeJoinedWithDirtyDb);
    assert!(zaps[0].2.contains("stale database"));
    assert!(!cluster.manager.state().contains(node));
    assert!(!cluster.manager.gc().is_syncing_or_synced(node));
    assert!(!cluster.collector.is_disabled());
}

/// A list request while active means two actives.
#[test]
fn test_split_brain_on_list_request() {
    let mut cluster = TestCluster::active(&[1, 2]);
    let other = NodeId::new();

    cluster
        .manager
        .on_message(other, ClusterMessage::ObjectListRequest)
        .unwrap();
    cluster.settle();

    let zaps = cluster.transport.zaps();
    assert_eq!(zaps.len(), 1);
    assert_eq!(zaps[0].1, ZapReason::SplitBrain);
    assert!(zaps[0].2.contains("split-brain"));
    assert_eq!(
        cluster.transport.sent_to(other),
        vec![ClusterMessage::ObjectListFailedResponse]
    );
}

/// Startup sweep: only clean, empty members are synced.
#[test]
fn test_sync_all_members_filters_responses() {
    let mut cluster = TestCluster::active(&[1, 2]);
    let clean = NodeId::new();
    let dirty = NodeId::new();
    let partial = NodeId::new();
    let confused = NodeId::new();

    let empty = |is_clean| ClusterMessage::ObjectListResponse {
        object_ids: ObjectIdSet::new(),
        is_clean_database: is_clean,
    };
    cluster.transport.respond_with(clean, empty(true));
    cluster.transport.respond_with(dirty, empty(false));
    cluster.transport.respond_with(
        partial,
        ClusterMessage::ObjectListResponse {
            object_ids: ids(&[1]),
            is_clean_database: true,
        },
    );
    cluster
        .transport
        .respond_with(confused, ClusterMessage::SyncCompleted { sequence: 1 });

    cluster.manager.sync_all_members().unwrap();
    assert_eq!(
        cluster.transport.broadcasts(),
        vec![ClusterMessage::ObjectListRequest]
    );

    let reasons: Vec<(NodeId, ZapReason)> = cluster
        .transport
        .zaps()
        .into_iter()
        .map(|(node, reason, _)| (node, reason))
        .collect();
    assert!(reasons.contains(&(dirty, ZapReason::NodeJoinedWithDirtyDb)));
    assert!(reasons.contains(&(partial, ZapReason::PartiallySyncedPassive)));
    assert!(reasons.contains(&(confused, ZapReason::ProgramError)));
    assert!(!cluster.transport.was_zapped(clean));

    cluster.settle();
    assert_eq!(cluster.manager.state().state_of(clean), Some(SyncState::InSync));
    assert_eq!(cluster.state.promoted(), vec![clean]);
}

/// Failing to acknowledge completion severs the passive.
#[test]
fn test_unsendable_completion_severs() {
    let mut cluster = TestCluster::active(&[1]);
    let node = NodeId::new();
    cluster.transport.fail_sends_to(node);

    cluster.manager.on_list_response(node, ids(&[1]), true);
    cluster.settle();

    let zaps = cluster.transport.zaps();
    assert_eq!(zaps.len(), 1);
    assert_eq!(zaps[0].1, ZapReason::CommunicationError);
    assert!(cluster.state.promoted().is_empty());
}

// =============================================================================
// Passive side
// =============================================================================

/// A fresh passive reports its objects as clean; after a batch it is dirty.
#[test]
fn test_passive_list_response_cleanliness() {
    let mut cluster = TestCluster::passive(&[4]);
    let active = NodeId::new();

    cluster.manager.on_list_request(active);
    assert!(cluster.transport.sent_to(active).is_empty());
    cluster.settle();
    assert_eq!(
        cluster.transport.sent_to(active),
        vec![ClusterMessage::ObjectListResponse {
            object_ids: ids(&[4]),
            is_clean_database: true,
        }]
    );

    let batch = ObjectSyncPayload {
        transaction_id: TransactionId::new(1),
        changes: vec![Change::new_object(ObjectId::new(5), vec![5])],
        roots: Default::default(),
    };
    cluster
        .manager
        .on_object_sync(active, batch, ObjectIdSet::new())
        .unwrap();

    cluster.manager.on_list_request(active);
    cluster.settle();
    let last = cluster.transport.sent_to(active).pop();
    assert!(matches!(
        last,
        Some(ClusterMessage::ObjectListResponse {
            is_clean_database: false,
            ..
        })
    ));
}

/// Known objects are not applied twice.
#[test]
fn test_passive_skips_objects_it_has() {
    let mut cluster = TestCluster::passive(&[1]);
    let active = NodeId::new();
    cluster.manager.on_list_request(active);
    cluster.settle();

    let batch = ObjectSyncPayload {
        transaction_id: TransactionId::new(1),
        changes: vec![
            Change::new_object(ObjectId::new(1), vec![1]),
            Change::new_object(ObjectId::new(2), vec![2]),
        ],
        roots: Default::default(),
    };
    cluster
        .manager
        .on_object_sync(active, batch, ObjectIdSet::new())
        .unwrap();

    assert_eq!(cluster.applier.applied_objects(), [2].into_iter().collect());
}

/// Collection results apply on passives and are ignored on the active.
#[test]
fn test_gc_result_applies_only_on_passive() {
    let result = GcResult::new(CollectionInfo::new(7, CollectorKind::Young), ids(&[9]));

    let passive = TestCluster::passive(&[9]);
    passive
        .manager
        .on_message(NodeId::new(), ClusterMessage::GcResult { result: result.clone() })
        .unwrap();
    let applied = passive.collector.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, ids(&[9]));
    assert_eq!(applied[0].1.iteration, 7);
    assert_eq!(passive.manager.metrics().snapshot().gc_results_applied, 1);

    let active = TestCluster::active(&[9]);
    active.manager.on_gc_result(NodeId::new(), result);
    assert!(active.collector.applied().is_empty());
}

/// Completion acknowledgements must strictly increase per sender.
#[test]
fn test_sync_completed_acknowledgement() {
    let passive = TestCluster::passive(&[]);
    let active = NodeId::new();

    passive
        .manager
        .on_message(active, ClusterMessage::SyncCompleted { sequence: 1 })
        .unwrap();
    assert_eq!(passive.state.sync_completed_count(), 1);

    let err = passive
        .manager
        .on_message(active, ClusterMessage::SyncCompleted { sequence: 1 })
        .unwrap_err();
    assert_eq!(err.kind, ReplicationErrorKind::SequenceRegression);
    assert_eq!(passive.state.sync_completed_count(), 1);
}

/// An active told that its own sync completed severs the sender.
#[test]
fn test_sync_completed_on_active_is_program_error() {
    let cluster = TestCluster::active(&[]);
    let sender = NodeId::new();
    cluster
        .manager
        .on_message(sender, ClusterMessage::SyncCompleted { sequence: 1 })
        .unwrap();

    let zaps = cluster.transport.zaps();
    assert_eq!(zaps.len(), 1);
    assert_eq!((zaps[0].0, zaps[0].1), (sender, ZapReason::ProgramError));
    assert_eq!(cluster.state.sync_completed_count(), 0);
}

/// Object sync on an active is a local invariant violation.
#[test]
fn test_object_sync_on_active_is_fatal() {
    let cluster = TestCluster::active(&[]);
    let batch = ObjectSyncPayload {
        transaction_id: TransactionId::new(1),
        changes: Vec::new(),
        roots: Default::default(),
    };
    let err = cluster
        .manager
        .on_object_sync(NodeId::new(), batch, ObjectIdSet::new())
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.kind, ReplicationErrorKind::AdmissionInvariant);
}
