//! Maintenance sweep removing records that repeat an earlier identity.
//!
//! This is looser than the live reconciler: a record's key is its source
//! timestamp, or its storage time truncated to the minute when the source
//! gave none. For each key only the oldest record is kept.

use std::collections::HashSet;

use chrono::{DateTime, Timelike, Utc};
use tracing::info;

use super::{SnapshotStore, StoreError};
use crate::model::{PersistedRecord, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub symbol: Symbol,
    pub scanned: usize,
    pub removed: usize,
}

pub fn sweep_key(record: &PersistedRecord) -> String {
    match &record.payload.source_timestamp {
        Some(ts) => ts.clone(),
        None => minute_floor(record.timestamp).to_rfc3339(),
    }
}

fn minute_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Ids of every record whose key already appeared in an older record.
/// `records` must be oldest first.
pub fn duplicate_ids(records: &[PersistedRecord]) -> Vec<i64> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| !seen.insert(sweep_key(r)))
        .filter_map(|r| r.id)
        .collect()
}

pub async fn sweep(store: &dyn SnapshotStore, symbol: Symbol) -> Result<SweepReport, StoreError> {
    let records = store.history(symbol, None).await?;
    let dupes = duplicate_ids(&records);
    let removed = if dupes.is_empty() {
        0
    } else {
        store.delete(&dupes).await?
    };
    info!(%symbol, scanned = records.len(), removed, "dedup sweep");
    Ok(SweepReport {
        symbol,
        scanned: records.len(),
        removed,
    })
}

pub async fn sweep_all(
    store: &dyn SnapshotStore,
    symbols: &[Symbol],
) -> Result<Vec<SweepReport>, StoreError> {
    let mut reports = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        reports.push(sweep(store, *symbol).await?);
    }
    Ok(reports)
}
