//! Persistent stores owned by the engine.
//!
//! Two independent SQLite stores: the versioned content store (cached
//! responses, partitioned into generations and namespaces) and the
//! durable operation log (client mutations awaiting acknowledgment). No
//! other subsystem writes to either directly.

mod content;
mod oplog;

pub use content::{CapturedResponse, ContentEntry, ContentStore, Namespace};
pub use oplog::{partition_of, OperationLog, PendingOperation};
