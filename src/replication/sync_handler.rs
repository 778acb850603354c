//! Object Sync Handler
//!
//! Drives batches for nodes that still miss objects. Work arrives as
//! `SyncObjectsRequest`s on an unbounded queue; each request ships at most
//! one batch and closes it before the next request for that node can be
//! produced, so a node never has two batches in flight.
//!
//! Busy objects and failed sends go back into the node's missing set and
//! are retried in a later batch.

use super::errors::ReplicationResult;
use super::orchestrator::ReplicatedObjectManager;
use crate::cluster::ClusterMessage;
use crate::model::{NodeId, ObjectIdSet, RootNameMapping, TransactionId};
use crate::observability::{log_event_with_fields, Event};
use crate::sync::BatchOutcome;
use crate::txn::ObjectSyncPayload;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use tokio::sync::mpsc;

/// Ask for the next batch to `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncObjectsRequest {
    pub node: NodeId,
}

impl SyncObjectsRequest {
    pub fn new(node: NodeId) -> Self {
        Self { node }
    }
}

/// Consumes sync requests and ships object batches.
pub struct ObjectSyncHandler {
    manager: Weak<ReplicatedObjectManager>,
    requests: mpsc::UnboundedReceiver<SyncObjectsRequest>,
    batch_size: usize,
    next_txn: AtomicU64,
}

impl ObjectSyncHandler {
    pub(crate) fn new(
        manager: Weak<ReplicatedObjectManager>,
        requests: mpsc::UnboundedReceiver<SyncObjectsRequest>,
        batch_size: usize,
    ) -> Self {
        Self {
            manager,
            requests,
            batch_size,
            next_txn: AtomicU64::new(1),
        }
    }

    /// Serve requests until the manager is dropped.
    pub async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            if self.manager.strong_count() == 0 {
                break;
            }
            let node = request.node;
            if let Err(err) = self.handle(request) {
                if let Some(manager) = self.manager.upgrade() {
                    manager.report(Some(node), &err);
                }
            }
        }
    }

    /// Handle the requests queued right now. Requests produced while
    /// handling them wait for the next call. Returns how many were handled.
    pub fn drain_pending(&mut self) -> usize {
        let mut queued = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            queued.push(request);
        }
        for request in &queued {
            if let Err(err) = self.handle(*request) {
                if let Some(manager) = self.manager.upgrade() {
                    manager.report(Some(request.node), &err);
                }
            }
        }
        queued.len()
    }

    /// Ship one batch to `request.node` and close it.
    pub fn handle(&self, request: SyncObjectsRequest) -> ReplicationResult<()> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };
        let node = request.node;

        let context = match manager.state().next_batch(node, self.batch_size) {
            Ok(context) => context,
            Err(err) if !err.is_fatal() => {
                log_event_with_fields(
                    Event::SyncCancelled,
                    &[("node", &node.to_string()), ("cause", &err.to_string())],
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let payload = manager.objects().sync_payload(context.object_ids());
        let busy = payload.busy.intersection(context.object_ids());
        let roots: RootNameMapping = context
            .roots()
            .iter()
            .filter(|(_, id)| !busy.contains(id))
            .map(|(name, id)| (name.to_string(), id))
            .collect();

        let transaction = ObjectSyncPayload {
            transaction_id: TransactionId::new(self.next_txn.fetch_add(1, Ordering::Relaxed)),
            changes: payload.changes,
            roots,
        };
        let shipped = transaction.changes.len();
        let message = ClusterMessage::ObjectSync {
            transaction,
            deleted_ids: payload.deleted,
        };

        let not_synced: ObjectIdSet = match manager.transport().send_to(node, message) {
            Ok(()) => busy,
            Err(err) => {
                log_event_with_fields(
                    Event::SendFailed,
                    &[("node", &node.to_string()), ("error", &err.to_string())],
                );
                context.object_ids().clone()
            }
        };
        let synced = context.len() - not_synced.len();

        manager
            .metrics()
            .record_batch(synced as u64, not_synced.len() as u64);
        log_event_with_fields(
            Event::BatchSent,
            &[
                ("node", &node.to_string()),
                ("sequence", &context.sequence().to_string()),
                ("objects", &shipped.to_string()),
                ("resubmitted", &not_synced.len().to_string()),
                ("synced", &(context.total_synced() + synced).to_string()),
                ("total", &context.total_to_sync().to_string()),
            ],
        );

        match manager.state().close_batch(context, &not_synced, synced)? {
            BatchOutcome::Remaining {
                missing,
                resubmitted,
            } => {
                if resubmitted > 0 {
                    log_event_with_fields(
                        Event::BatchResubmitted,
                        &[
                            ("node", &node.to_string()),
                            ("objects", &resubmitted.to_string()),
                        ],
                    );
                }
                manager.on_missing_object_count(node, missing);
            }
            BatchOutcome::PendingNotify => manager.on_pending_notify(node),
            BatchOutcome::Cancelled => log_event_with_fields(
                Event::SyncCancelled,
                &[("node", &node.to_string()), ("cause", "left during batch")],
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object_ids;
    use crate::sync::SyncState;
    use crate::testing::TestCluster;

    #[test]
    fn test_batches_respect_size() {
        let mut cluster = TestCluster::active_with_batch(&[1, 2, 3, 4, 5], 2);
        let node = NodeId::new();
        cluster.manager.on_list_response(node, ObjectIdSet::new(), true);
        cluster.settle();

        let batches = cluster.transport.object_syncs_to(node);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|(txn, _)| txn.changes.len() <= 2));
        assert_eq!(cluster.manager.state().state_of(node), Some(SyncState::InSync));
    }

    #[test]
    fn test_busy_objects_are_resent() {
        let mut cluster = TestCluster::active_with_batch(&[1, 2], 10);
        cluster.objects.set_busy(object_ids([2]));
        let node = NodeId::new();
        cluster.manager.on_list_response(node, ObjectIdSet::new(), true);
        cluster.transactions.drain();

        assert_eq!(cluster.handler.drain_pending(), 1);
        assert_eq!(cluster.manager.state().missing_snapshot(node), Some(object_ids([2])));

        cluster.objects.set_busy(ObjectIdSet::new());
        cluster.settle();

        let shipped: Vec<u64> = cluster
            .transport
            .object_syncs_to(node)
            .iter()
            .flat_map(|(txn, _)| txn.changes.iter().map(|c| c.object_id.as_u64()))
            .collect();
        assert_eq!(shipped, vec![1, 2]);
        assert_eq!(cluster.manager.metrics().snapshot().objects_resubmitted, 1);
    }

    #[test]
    fn test_send_failure_resubmits_whole_batch() {
        let cluster = TestCluster::active_with_batch(&[1, 2], 10);
        let node = NodeId::new();
        cluster.manager.on_list_response(node, ObjectIdSet::new(), true);
        cluster.transactions.drain();

        cluster.transport.fail_sends_to(node);
        cluster.handler.handle(SyncObjectsRequest::new(node)).unwrap();
        assert_eq!(
            cluster.manager.state().missing_snapshot(node),
            Some(object_ids([1, 2]))
        );
    }

    #[tokio::test]
    async fn test_run_loop_drives_sync_and_stops_with_manager() {
        let TestCluster {
            manager,
            handler,
            transactions,
            transport,
            ..
        } = TestCluster::active_with_batch(&[1, 2, 3], 1);
        let driver = tokio::spawn(handler.run());

        let node = NodeId::new();
        manager.on_list_response(node, ObjectIdSet::new(), true);
        for _ in 0..500 {
            transactions.drain();
            if manager.state().state_of(node) == Some(SyncState::InSync) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        assert_eq!(manager.state().state_of(node), Some(SyncState::InSync));
        assert_eq!(transport.object_syncs_to(node).len(), 3);

        drop(manager);
        driver.await.unwrap();
    }

    #[test]
    fn test_request_for_removed_node_is_dropped() {
        let cluster = TestCluster::active_with_batch(&[1], 10);
        let node = NodeId::new();
        assert!(cluster.handler.handle(SyncObjectsRequest::new(node)).is_ok());
        assert!(cluster.transport.object_syncs_to(node).is_empty());
    }
}
