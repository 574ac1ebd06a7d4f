//! Transactions, index maintenance, temporal axes, and resource management.
//!
//! A [`Database`] holds named resources. Each resource is a versioned tree
//! reached through its [`ResourceManager`]: read transactions
//! ([`NodeReadTrx`]) are pinned to one committed revision, and a single write
//! transaction ([`NodeWriteTrx`]) stages the next revision in an overlay and
//! publishes it atomically on commit. Secondary indexes are defined and
//! queried through an [`IndexController`] and maintained in the same commit
//! as the nodes they describe.

pub mod axis;
pub mod config;
pub mod cursor;
pub mod database;
pub mod index;
pub mod node_read;
pub mod node_write;
pub mod page_trx;
pub mod resource;

#[cfg(test)]
mod test_util;

pub use axis::{TemporalAxis, TemporalAxisKind};
pub use config::{DatabaseConfig, ResourceConfig};
pub use cursor::NodeCursor;
pub use database::Database;
pub use index::{IndexController, IndexQuery};
pub use node_read::NodeReadTrx;
pub use node_write::{InsertPosition, NewNode, NodeWriteTrx};
pub use page_trx::{CommitReport, PageReadTrx, PageWriteTrx, TrieId};
pub use resource::{CompactionHook, OrphanedExtent, ResourceManager, RevisionInfo};
