use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use oi_tracker::model::{PersistedRecord, SideQuote, Snapshot, StrikeRow, Symbol};
use oi_tracker::reconcile::{Reconciler, Thresholds};
use oi_tracker::store::{SnapshotStore, SqliteStore, dedup};

// ── Helpers ─────────────────────────────────────────────────────────

fn side(oi: f64) -> SideQuote {
    SideQuote {
        open_interest: oi,
        volume: oi / 10.0,
        ..Default::default()
    }
}

fn snapshot(stamp: Option<&str>, spot: f64, strikes: &[(f64, f64, f64)]) -> Snapshot {
    let rows = strikes
        .iter()
        .map(|&(strike, ce, pe)| StrikeRow::new(strike, side(ce), side(pe)))
        .collect();
    let mut snap = Snapshot::new(Symbol::Nifty, spot, rows);
    snap.source_timestamp = stamp.map(str::to_string);
    snap
}

fn sqlite() -> Arc<dyn SnapshotStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

// ── Reconciliation over sqlite ──────────────────────────────────────

#[tokio::test]
async fn a_session_of_polls_keeps_only_material_changes() {
    let store = sqlite();
    let reconciler = Reconciler::new(store.clone());

    let polls = [
        // First ever: stored, diffs zero.
        snapshot(Some("10:00"), 19510.0, &[(19500.0, 1000.0, 900.0), (19900.0, 50.0, 50.0)]),
        // Same provider clock: dropped before any comparison.
        snapshot(Some("10:00"), 19515.0, &[(19500.0, 5000.0, 900.0)]),
        // New clock, moves within noise: dropped.
        snapshot(Some("10:03"), 19512.0, &[(19500.0, 1004.0, 903.0), (19900.0, 50.0, 50.0)]),
        // Only an out-of-band strike moved: dropped.
        snapshot(Some("10:06"), 19512.0, &[(19500.0, 1000.0, 900.0), (19900.0, 900.0, 50.0)]),
        // At-the-money put moved: stored.
        snapshot(Some("10:09"), 19508.0, &[(19500.0, 1000.0, 1100.0), (19900.0, 900.0, 50.0)]),
    ];

    let mut persisted = Vec::new();
    for snap in polls {
        if let oi_tracker::Reconciliation::Persisted(rec) = reconciler.reconcile(snap).await.unwrap() {
            persisted.push(rec);
        }
    }

    assert_eq!(persisted.len(), 2);
    assert_eq!(store.count(Symbol::Nifty).await.unwrap(), 2);

    let first = &persisted[0].payload.rows[0];
    assert_eq!(first.call.diff_open_interest, 0.0);

    let last = &persisted[1].payload;
    let atm = last.rows.iter().find(|r| r.strike_price == 19500.0).unwrap();
    assert_eq!(atm.put.diff_open_interest, 200.0);
    assert_eq!(atm.call.diff_open_interest, 0.0);
    // Diffs are against the stored record, not the dropped polls.
    let far = last.rows.iter().find(|r| r.strike_price == 19900.0).unwrap();
    assert_eq!(far.call.diff_open_interest, 850.0);

    assert!(persisted[1].timestamp > persisted[0].timestamp);

    let latest = store.latest(Symbol::Nifty).await.unwrap().unwrap();
    assert_eq!(latest.payload.source_timestamp.as_deref(), Some("10:09"));
}

#[tokio::test]
async fn custom_thresholds_widen_the_band() {
    let store = sqlite();
    let reconciler = Reconciler::with_thresholds(
        store.clone(),
        Thresholds {
            band: 500.0,
            ..Thresholds::default()
        },
    );

    reconciler
        .reconcile(snapshot(Some("a"), 19500.0, &[(19900.0, 100.0, 100.0)]))
        .await
        .unwrap();
    let outcome = reconciler
        .reconcile(snapshot(Some("b"), 19500.0, &[(19900.0, 400.0, 100.0)]))
        .await
        .unwrap();
    assert!(!outcome.is_no_change());
}

// ── Maintenance sweep ───────────────────────────────────────────────

#[tokio::test]
async fn sweep_keeps_the_oldest_record_per_identity() {
    let store = sqlite();
    let base = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap();

    let entries = [
        (Symbol::Nifty, Some("09:30"), 0),
        (Symbol::Nifty, Some("09:30"), 20),
        (Symbol::Nifty, Some("09:33"), 200),
        // No source clock: keyed by storage minute.
        (Symbol::Nifty, None, 300),
        (Symbol::Nifty, None, 330),
        (Symbol::BankNifty, Some("09:30"), 10),
    ];
    for (symbol, stamp, offset) in entries {
        let mut payload = snapshot(stamp, 19500.0, &[(19500.0, 1.0, 1.0)]);
        payload.symbol = symbol;
        store
            .append(PersistedRecord {
                id: None,
                symbol,
                timestamp: base + Duration::seconds(offset),
                payload,
            })
            .await
            .unwrap();
    }

    let reports = dedup::sweep_all(store.as_ref(), &[Symbol::Nifty, Symbol::BankNifty])
        .await
        .unwrap();
    assert_eq!(reports[0].scanned, 5);
    assert_eq!(reports[0].removed, 2);
    assert_eq!(reports[1].removed, 0);

    let remaining = store.history(Symbol::Nifty, None).await.unwrap();
    let offsets: Vec<i64> = remaining
        .iter()
        .map(|r| (r.timestamp - base).num_seconds())
        .collect();
    assert_eq!(offsets, vec![0, 200, 300]);

    // A second pass finds nothing.
    let again = dedup::sweep(store.as_ref(), Symbol::Nifty).await.unwrap();
    assert_eq!(again.removed, 0);
}
