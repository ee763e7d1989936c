//! Decides whether a fresh snapshot is worth storing and enriches it with
//! per-strike deltas against the last stored one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::model::{PersistedRecord, Reconciliation, Snapshot, StrikeRow};
use crate::store::{SnapshotStore, StoreError};

/// Materiality gate parameters.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Only strikes within this distance of spot are compared.
    pub band: f64,
    /// OI moves at or below this on a known strike are noise.
    pub noise: f64,
    /// A strike absent from the prior record counts only above this OI.
    pub significance: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            band: 300.0,
            noise: 5.0,
            significance: 100.0,
        }
    }
}

impl Thresholds {
    fn in_band(&self, row: &StrikeRow, spot: f64) -> bool {
        // Without a spot price every strike is compared.
        spot <= 0.0 || (row.strike_price - spot).abs() <= self.band
    }

    /// First in-band strike that makes `current` differ materially from
    /// `prior`, if any.
    pub fn material_strike(&self, prior: &Snapshot, current: &Snapshot) -> Option<f64> {
        let index = index_rows(prior);
        current
            .rows
            .iter()
            .filter(|row| self.in_band(row, current.underlying_value))
            .find(|row| match index.get(&row.strike_key()) {
                Some(prev) => {
                    (row.call.open_interest - prev.call.open_interest).abs() > self.noise
                        || (row.put.open_interest - prev.put.open_interest).abs() > self.noise
                }
                None => {
                    row.call.open_interest > self.significance
                        || row.put.open_interest > self.significance
                }
            })
            .map(|row| row.strike_price)
    }
}

fn index_rows(snapshot: &Snapshot) -> HashMap<i64, &StrikeRow> {
    snapshot.rows.iter().map(|r| (r.strike_key(), r)).collect()
}

/// Fill every row's diff fields from `prior`; zeros where there is nothing
/// to compare against.
pub fn apply_diffs(snapshot: &mut Snapshot, prior: Option<&Snapshot>) {
    let index = prior.map(index_rows).unwrap_or_default();
    for row in &mut snapshot.rows {
        match index.get(&row.strike_key()) {
            Some(prev) => {
                row.call.diff_against(&prev.call);
                row.put.diff_against(&prev.put);
            }
            None => {
                row.call.clear_diffs();
                row.put.clear_diffs();
            }
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn SnapshotStore>,
    thresholds: Thresholds,
    /// Held from reading the latest record until the append completes.
    write_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self::with_thresholds(store, Thresholds::default())
    }

    pub fn with_thresholds(store: Arc<dyn SnapshotStore>, thresholds: Thresholds) -> Self {
        Self {
            store,
            thresholds,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Compare `snapshot` with the latest stored record for its symbol and
    /// append it when it differs materially.
    ///
    /// Calls are serialized, so a scheduled cycle and an on-demand refresh
    /// never compare against the same prior record.
    pub async fn reconcile(&self, mut snapshot: Snapshot) -> Result<Reconciliation, StoreError> {
        let _write = self.write_lock.lock().await;
        let symbol = snapshot.symbol;
        let prior = self.store.latest(symbol).await?;

        if let Some(prior) = &prior {
            if snapshot.source_timestamp.is_some()
                && snapshot.source_timestamp == prior.payload.source_timestamp
            {
                debug!(%symbol, stamp = ?snapshot.source_timestamp, "source clock unchanged");
                return Ok(Reconciliation::NoChange);
            }
            match self.thresholds.material_strike(&prior.payload, &snapshot) {
                Some(strike) => debug!(%symbol, strike, "material open interest change"),
                None => {
                    debug!(%symbol, "no material open interest change");
                    return Ok(Reconciliation::NoChange);
                }
            }
        }

        apply_diffs(&mut snapshot, prior.as_ref().map(|p| &p.payload));

        // Storage time is kept at millisecond precision and never goes
        // backwards within a symbol.
        let now = Utc::now();
        let now = DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let timestamp = match &prior {
            Some(p) if p.timestamp >= now => p.timestamp + Duration::milliseconds(1),
            _ => now,
        };

        let stored = self
            .store
            .append(PersistedRecord {
                id: None,
                symbol,
                timestamp,
                payload: snapshot,
            })
            .await?;
        info!(%symbol, id = ?stored.id, rows = stored.payload.rows.len(), "snapshot persisted");
        Ok(Reconciliation::Persisted(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SideQuote, Symbol};
    use crate::store::MemoryStore;

    fn side(oi: f64, volume: f64) -> SideQuote {
        SideQuote {
            open_interest: oi,
            volume,
            ..Default::default()
        }
    }

    fn snap(spot: f64, stamp: Option<&str>, rows: &[(f64, f64, f64)]) -> Snapshot {
        let rows = rows
            .iter()
            .map(|&(strike, ce, pe)| StrikeRow::new(strike, side(ce, ce * 2.0), side(pe, pe * 3.0)))
            .collect();
        let mut s = Snapshot::new(Symbol::Nifty, spot, rows);
        s.source_timestamp = stamp.map(str::to_string);
        s
    }

    fn reconciler() -> (Arc<MemoryStore>, Reconciler) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Reconciler::new(store))
    }

    fn persisted(r: Reconciliation) -> PersistedRecord {
        match r {
            Reconciliation::Persisted(rec) => rec,
            Reconciliation::NoChange => panic!("expected a persisted record"),
        }
    }

    #[tokio::test]
    async fn first_snapshot_is_stored_with_zero_diffs() {
        let (store, rec) = reconciler();
        let out = persisted(
            rec.reconcile(snap(19_510.0, Some("t1"), &[(19_500.0, 1000.0, 900.0)]))
                .await
                .unwrap(),
        );
        assert!(out.id.is_some());
        let row = &out.payload.rows[0];
        assert_eq!(row.call.diff_open_interest, 0.0);
        assert_eq!(row.call.diff_total_volume, 0.0);
        assert_eq!(row.put.diff_open_interest, 0.0);
        assert_eq!(store.count(Symbol::Nifty).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unchanged_source_stamp_short_circuits() {
        let (store, rec) = reconciler();
        rec.reconcile(snap(19_510.0, Some("t1"), &[(19_500.0, 1000.0, 900.0)]))
            .await
            .unwrap();
        let out = rec
            .reconcile(snap(19_510.0, Some("t1"), &[(19_500.0, 99_999.0, 0.0)]))
            .await
            .unwrap();
        assert!(out.is_no_change());
        assert_eq!(store.count(Symbol::Nifty).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn change_above_noise_is_persisted_with_diffs() {
        let (_, rec) = reconciler();
        rec.reconcile(snap(19_510.0, Some("t1"), &[(19_500.0, 1000.0, 900.0)]))
            .await
            .unwrap();
        let out = persisted(
            rec.reconcile(snap(19_510.0, Some("t2"), &[(19_500.0, 1010.0, 900.0)]))
                .await
                .unwrap(),
        );
        let row = &out.payload.rows[0];
        assert_eq!(row.call.diff_open_interest, 10.0);
        assert_eq!(row.call.diff_total_volume, 20.0);
        assert_eq!(row.put.diff_open_interest, 0.0);
    }

    #[tokio::test]
    async fn noise_level_change_is_ignored() {
        let (_, rec) = reconciler();
        rec.reconcile(snap(19_510.0, Some("t1"), &[(19_500.0, 1000.0, 900.0)]))
            .await
            .unwrap();
        let out = rec
            .reconcile(snap(19_510.0, Some("t2"), &[(19_500.0, 1005.0, 895.0)]))
            .await
            .unwrap();
        assert!(out.is_no_change());
    }

    #[tokio::test]
    async fn small_new_strike_is_not_material() {
        let (_, rec) = reconciler();
        rec.reconcile(snap(19_510.0, Some("t1"), &[(19_500.0, 1000.0, 900.0)]))
            .await
            .unwrap();
        let out = rec
            .reconcile(snap(
                19_510.0,
                Some("t2"),
                &[(19_500.0, 1000.0, 900.0), (19_650.0, 50.0, 50.0)],
            ))
            .await
            .unwrap();
        assert!(out.is_no_change());

        let out = rec
            .reconcile(snap(
                19_510.0,
                Some("t3"),
                &[(19_500.0, 1000.0, 900.0), (19_650.0, 50.0, 101.0)],
            ))
            .await
            .unwrap();
        let rec = persisted(out);
        // The new strike has nothing to diff against.
        assert_eq!(rec.payload.rows[1].put.diff_open_interest, 0.0);
    }

    #[tokio::test]
    async fn out_of_band_changes_are_ignored() {
        let (_, rec) = reconciler();
        rec.reconcile(snap(
            19_510.0,
            Some("t1"),
            &[(19_500.0, 1000.0, 900.0), (20_000.0, 10.0, 10.0)],
        ))
        .await
        .unwrap();
        let out = rec
            .reconcile(snap(
                19_510.0,
                Some("t2"),
                &[(19_500.0, 1000.0, 900.0), (20_000.0, 50_000.0, 10.0)],
            ))
            .await
            .unwrap();
        assert!(out.is_no_change());
    }

    #[tokio::test]
    async fn zero_spot_compares_every_strike() {
        let (_, rec) = reconciler();
        rec.reconcile(snap(0.0, None, &[(20_000.0, 10.0, 10.0)]))
            .await
            .unwrap();
        let out = rec
            .reconcile(snap(0.0, None, &[(20_000.0, 50.0, 10.0)]))
            .await
            .unwrap();
        assert!(!out.is_no_change());
    }

    #[tokio::test]
    async fn reconciling_twice_stores_once() {
        let (store, rec) = reconciler();
        let s = snap(19_510.0, None, &[(19_500.0, 1000.0, 900.0)]);
        rec.reconcile(s.clone()).await.unwrap();
        rec.reconcile(snap(19_510.0, None, &[(19_500.0, 1100.0, 900.0)]))
            .await
            .unwrap();
        let again = rec
            .reconcile(snap(19_510.0, None, &[(19_500.0, 1100.0, 900.0)]))
            .await
            .unwrap();
        assert!(again.is_no_change());
        assert_eq!(store.count(Symbol::Nifty).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn storage_time_is_monotonic() {
        let (store, rec) = reconciler();
        for i in 0..5 {
            rec.reconcile(snap(19_510.0, None, &[(19_500.0, 1000.0 + 100.0 * i as f64, 0.0)]))
                .await
                .unwrap();
        }
        let history = store.history(Symbol::Nifty, None).await.unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let (store, rec) = reconciler();
        store.set_offline(true);
        let err = rec
            .reconcile(snap(19_510.0, None, &[(19_500.0, 1.0, 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    /// Memory store whose reads take a while, so concurrent callers interleave.
    struct SlowReads(MemoryStore);

    #[async_trait::async_trait]
    impl SnapshotStore for SlowReads {
        async fn latest(&self, symbol: Symbol) -> Result<Option<PersistedRecord>, StoreError> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.0.latest(symbol).await
        }

        async fn history(
            &self,
            symbol: Symbol,
            limit: Option<usize>,
        ) -> Result<Vec<PersistedRecord>, StoreError> {
            self.0.history(symbol, limit).await
        }

        async fn append(&self, record: PersistedRecord) -> Result<PersistedRecord, StoreError> {
            self.0.append(record).await
        }

        async fn count(&self, symbol: Symbol) -> Result<usize, StoreError> {
            self.0.count(symbol).await
        }

        async fn delete(&self, ids: &[i64]) -> Result<usize, StoreError> {
            self.0.delete(ids).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.0.ping().await
        }
    }

    #[tokio::test]
    async fn overlapping_calls_store_one_record() {
        let store = Arc::new(SlowReads(MemoryStore::new()));
        let rec = Reconciler::new(store.clone());
        let chain = [(19_500.0, 1000.0, 900.0)];

        let (a, b) = tokio::join!(
            rec.reconcile(snap(19_510.0, Some("19-Oct-2026 10:03:00"), &chain)),
            rec.reconcile(snap(19_510.0, Some("19-Oct-2026 10:03:00"), &chain)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.is_no_change() != b.is_no_change());
        assert_eq!(store.count(Symbol::Nifty).await.unwrap(), 1);

        // Distinct clocks racing each other still get ordered storage times.
        let (c, d) = tokio::join!(
            rec.reconcile(snap(19_510.0, Some("19-Oct-2026 10:06:00"), &[(19_500.0, 2000.0, 900.0)])),
            rec.reconcile(snap(19_510.0, Some("19-Oct-2026 10:09:00"), &[(19_500.0, 3000.0, 900.0)])),
        );
        assert!(!c.unwrap().is_no_change());
        assert!(!d.unwrap().is_no_change());
        let history = store.history(Symbol::Nifty, None).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
