//! Indexing pipeline: script registry, transaction lifecycle, block commit and
//! the sync service driving them from node notifications.

pub mod block_indexer;
pub mod script_registry;
pub mod service;
pub mod transaction_indexer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use block_indexer::{BlockCommit, BlockCommitter, CommittedTransaction};
pub use script_registry::ScriptRegistry;
pub use service::{SyncService, TopicState};
pub use transaction_indexer::TransactionIndexer;
