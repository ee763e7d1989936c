pub mod dedup;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{PersistedRecord, Symbol};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Append-only snapshot persistence, one ordered stream per symbol.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recent record for `symbol` by storage time.
    async fn latest(&self, symbol: Symbol) -> Result<Option<PersistedRecord>, StoreError>;

    /// The newest `limit` records (all when `None`), oldest first.
    async fn history(
        &self,
        symbol: Symbol,
        limit: Option<usize>,
    ) -> Result<Vec<PersistedRecord>, StoreError>;

    /// Append one record and return it with its assigned id.
    async fn append(&self, record: PersistedRecord) -> Result<PersistedRecord, StoreError>;

    async fn count(&self, symbol: Symbol) -> Result<usize, StoreError>;

    /// Maintenance only; never called on the acquisition path.
    async fn delete(&self, ids: &[i64]) -> Result<usize, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
