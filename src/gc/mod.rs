//! Garbage collection coordination
//!
//! Garbage collection and object sync are mutually exclusive:
//! - While any passive is catching up, the collector stays disabled
//! - A passive that joins mid-collection is queued until the cycle ends
//! - Collection results are broadcast so passives delete the same objects
//!
//! Objects are never deleted while being replicated, and replication never
//! resurrects objects the collector already retired.

mod coordinator;
mod result;

pub use coordinator::{GateDecision, GcCoordinator, GcRetryPolicy};
pub use result::{CollectionInfo, CollectorKind, GcResult};
