//! Transactions and snapshots over the multi-version table.
//!
//! - Transactions buffer writes and read through to the latest commit
//! - Commits append one WAL batch, then apply it at a new sequence
//! - Snapshots pin a sequence and never observe later commits
//! - Checkpoints fold the table into an image and reclaim unpinned versions

pub(crate) mod inner;
mod read;
mod snapshot;
mod table;
mod transaction;

pub use inner::RecoveryStats;
pub use read::DbRead;
pub use snapshot::Snapshot;
pub use transaction::{Transaction, TransactionState};
