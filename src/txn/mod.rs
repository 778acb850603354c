//! Transaction admission
//!
//! - `ServerTransaction`: read contract shared by full and pruned transactions
//! - `PendingChangesAccount`: deltas parked until their object arrives
//! - `TransactionAdmissionGate`: role-dependent entry point into the local
//!   transaction manager

mod admission;
mod errors;
mod pending;
mod transaction;

pub use admission::{AdmissionMode, SyncAdmission, TransactionAdmissionGate};
pub use errors::{AdmissionError, AdmissionResult};
pub use pending::{PendingChangesAccount, PendingRecord};
pub use transaction::{
    BatchId, Change, FullTransaction, LockId, Notify, ObjectSyncPayload, PrunedTransaction,
    ServerTransaction, StringTable, TxnRef, TxnType,
};
