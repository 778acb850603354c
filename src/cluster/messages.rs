//! Cluster messages and zap reasons

use super::errors::TransportResult;
use crate::gc::GcResult;
use crate::model::ObjectIdSet;
use crate::txn::ObjectSyncPayload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group messages exchanged by the replication protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterMessage {
    /// Active asks a peer which objects it already holds
    ObjectListRequest,

    /// Peer's answer to `ObjectListRequest`
    ObjectListResponse {
        object_ids: ObjectIdSet,
        is_clean_database: bool,
    },

    /// Peer cannot answer in its current role
    ObjectListFailedResponse,

    /// Collection result, broadcast fire-and-forget
    GcResult { result: GcResult },

    /// Active acknowledges that a passive is fully synced
    SyncCompleted { sequence: u64 },

    /// One batch of objects for a syncing passive
    ObjectSync {
        transaction: ObjectSyncPayload,
        deleted_ids: ObjectIdSet,
    },
}

impl ClusterMessage {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectListRequest => "object_list_request",
            Self::ObjectListResponse { .. } => "object_list_response",
            Self::ObjectListFailedResponse => "object_list_failed_response",
            Self::GcResult { .. } => "gc_result",
            Self::SyncCompleted { .. } => "sync_completed",
            Self::ObjectSync { .. } => "object_sync",
        }
    }

    /// Encode for the wire.
    pub fn encode(&self) -> TransportResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire.
    pub fn decode(bytes: &[u8]) -> TransportResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for ClusterMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a peer's connection was severed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZapReason {
    /// Message or state that the protocol never produces
    ProgramError,
    /// Two nodes both acting as active
    SplitBrain,
    /// Joining passive has persisted state from an earlier run
    NodeJoinedWithDirtyDb,
    /// Joining passive already holds objects
    PartiallySyncedPassive,
    /// Transport could not reach the peer
    CommunicationError,
}

impl ZapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProgramError => "PROGRAM_ERROR",
            Self::SplitBrain => "SPLIT_BRAIN",
            Self::NodeJoinedWithDirtyDb => "NODE_JOINED_WITH_DIRTY_DB",
            Self::PartiallySyncedPassive => "PARTIALLY_SYNCED_PASSIVE",
            Self::CommunicationError => "COMMUNICATION_ERROR",
        }
    }
}

impl fmt::Display for ZapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
