//! Data model shared by every subsystem
//!
//! - Identity value types for nodes, objects and transactions
//! - Ordered object id sets with bounded draining
//! - Named root mappings

mod ids;
mod object_set;
mod roots;

pub use ids::{GlobalTransactionId, NodeId, ObjectId, TransactionId};
pub use object_set::{object_ids, ObjectIdSet};
pub use roots::RootNameMapping;
