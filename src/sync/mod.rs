//! Sync state machine
//!
//! Tracks each passive's replication progress and computes what it is
//! missing:
//! - `NodeSyncState`: one passive's state, missing set and batch cursor
//! - `ObjectStateManager`: the locked map of every tracked passive
//! - `SyncProgressContext`: one batch, handed out and given back exactly once
//!
//! States only move forward. A passive starts over only by being removed
//! and added again.

mod context;
mod errors;
mod manager;
mod node_state;
mod state;

pub use context::SyncProgressContext;
pub use errors::{SyncError, SyncErrorKind, SyncResult};
pub use manager::ObjectStateManager;
pub use node_state::{BatchOutcome, DiffSummary, NodeSyncState};
pub use state::SyncState;
