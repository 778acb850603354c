//! objsync - object replication core for an active/passive cluster
//!
//! The active coordinator owns the authoritative object graph. Passives
//! joining the cluster are brought up to date by diffing what they report
//! against what the active holds and shipping the difference in batches,
//! while live transactions keep flowing and the distributed collector is
//! held off.

pub mod cluster;
pub mod gc;
pub mod model;
pub mod observability;
pub mod replication;
pub mod sync;
pub mod testing;
pub mod txn;
