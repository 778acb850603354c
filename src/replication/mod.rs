//! Replication Subsystem
//!
//! Object replication between the active coordinator and its passives:
//! - The active asks members for their objects and vets the answers
//! - Missing objects ship in bounded batches while the collector is held
//! - Collection results and sync completion are pushed to passives
//! - Passives answer list requests and admit what the active sends
//!
//! Replication can be switched off at startup; every entry point then
//! does nothing.

mod config;
mod errors;
mod orchestrator;
mod sequence;
mod sync_handler;

pub use config::ReplicationConfig;
pub use errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
pub use orchestrator::{Collaborators, ReplicatedObjectManager};
pub use sequence::{SequenceGenerator, SequenceValidator};
pub use sync_handler::{ObjectSyncHandler, SyncObjectsRequest};
