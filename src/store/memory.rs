use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SnapshotStore, StoreError};
use crate::model::{PersistedRecord, Symbol};

/// Process-local store for tests and mock runs.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Symbol, Vec<PersistedRecord>>>,
    next_id: AtomicI64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every call fails until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn latest(&self, symbol: Symbol) -> Result<Option<PersistedRecord>, StoreError> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records
            .get(&symbol)
            .and_then(|rs| rs.iter().max_by_key(|r| (r.timestamp, r.id)))
            .cloned())
    }

    async fn history(
        &self,
        symbol: Symbol,
        limit: Option<usize>,
    ) -> Result<Vec<PersistedRecord>, StoreError> {
        self.check()?;
        let records = self.records.read().await;
        let mut rs = records.get(&symbol).cloned().unwrap_or_default();
        rs.sort_by_key(|r| (r.timestamp, r.id));
        if let Some(limit) = limit {
            let skip = rs.len().saturating_sub(limit);
            rs.drain(..skip);
        }
        Ok(rs)
    }

    async fn append(&self, mut record: PersistedRecord) -> Result<PersistedRecord, StoreError> {
        self.check()?;
        record.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.records
            .write()
            .await
            .entry(record.symbol)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn count(&self, symbol: Symbol) -> Result<usize, StoreError> {
        self.check()?;
        Ok(self.records.read().await.get(&symbol).map_or(0, Vec::len))
    }

    async fn delete(&self, ids: &[i64]) -> Result<usize, StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        let mut removed = 0;
        for rs in records.values_mut() {
            let before = rs.len();
            rs.retain(|r| !r.id.is_some_and(|id| ids.contains(&id)));
            removed += before - rs.len();
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
