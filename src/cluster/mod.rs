//! Cluster boundary
//!
//! - Group messages exchanged by the replication protocol
//! - Zap reasons for severed peers
//! - Traits for every external collaborator (transport, object manager,
//!   collector, transaction pipeline, cluster state)

mod collaborators;
mod errors;
mod messages;

pub use collaborators::{
    ClusterStateManager, GarbageCollector, GroupTransport, NodeRole, ObjectManager, SyncPayload,
    TransactionManager, TransactionalObjectManager, TxnsApplied,
};
pub use errors::{TransportError, TransportResult};
pub use messages::{ClusterMessage, ZapReason};
