use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Symbol;

// ── Per-side market state ───────────────────────────────────────────

/// Call or put state at one strike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideQuote {
    pub open_interest: f64,
    pub change_in_open_interest: f64,
    pub volume: f64,
    pub last_price: f64,
    pub implied_volatility: f64,
    /// Open interest change against the previously persisted snapshot.
    #[serde(default)]
    pub diff_open_interest: f64,
    /// Volume change against the previously persisted snapshot.
    #[serde(default)]
    pub diff_total_volume: f64,
}

impl SideQuote {
    pub fn clear_diffs(&mut self) {
        self.diff_open_interest = 0.0;
        self.diff_total_volume = 0.0;
    }

    pub fn diff_against(&mut self, prior: &SideQuote) {
        self.diff_open_interest = self.open_interest - prior.open_interest;
        self.diff_total_volume = self.volume - prior.volume;
    }
}

/// One strike of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeRow {
    pub strike_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    pub call: SideQuote,
    pub put: SideQuote,
}

impl StrikeRow {
    pub fn new(strike_price: f64, call: SideQuote, put: SideQuote) -> Self {
        Self {
            strike_price,
            expiry_date: None,
            call,
            put,
        }
    }

    /// Lookup key for a strike. Strikes are quoted to at most two decimals,
    /// so scaling to hundredths gives an exact integer key.
    pub fn strike_key(&self) -> i64 {
        strike_key(self.strike_price)
    }
}

pub fn strike_key(strike_price: f64) -> i64 {
    (strike_price * 100.0).round() as i64
}

// ── Snapshot ────────────────────────────────────────────────────────

/// One acquisition result for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub symbol: Symbol,
    /// Provider's own "as of" stamp; authoritative for identity when present.
    pub source_timestamp: Option<String>,
    pub underlying_value: f64,
    #[serde(default)]
    pub expiry_dates: Vec<String>,
    pub rows: Vec<StrikeRow>,
    pub captured_at: DateTime<Utc>,
}

/// Aggregate open interest across the chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTotals {
    pub call_open_interest: f64,
    pub put_open_interest: f64,
    /// Put OI over call OI; zero when there is no call OI.
    pub put_call_ratio: f64,
}

impl Snapshot {
    pub fn new(symbol: Symbol, underlying_value: f64, rows: Vec<StrikeRow>) -> Self {
        Self {
            symbol,
            source_timestamp: None,
            underlying_value,
            expiry_dates: Vec::new(),
            rows,
            captured_at: Utc::now(),
        }
    }

    /// Identity used by maintenance sweeps: the provider stamp, or the
    /// capture time when the provider gave none.
    pub fn identity_key(&self) -> String {
        match &self.source_timestamp {
            Some(ts) => ts.clone(),
            None => self.captured_at.to_rfc3339(),
        }
    }

    pub fn totals(&self) -> ChainTotals {
        let call_open_interest: f64 = self.rows.iter().map(|r| r.call.open_interest).sum();
        let put_open_interest: f64 = self.rows.iter().map(|r| r.put.open_interest).sum();
        let put_call_ratio = if call_open_interest > 0.0 {
            put_open_interest / call_open_interest
        } else {
            0.0
        };
        ChainTotals {
            call_open_interest,
            put_open_interest,
            put_call_ratio,
        }
    }

    /// Drop rows whose strike already appeared earlier in the chain.
    pub fn dedup_strikes(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.rows.retain(|row| seen.insert(row.strike_key()));
    }
}

// ── Persistence ─────────────────────────────────────────────────────

/// Durable, append-only wrapper around an enriched snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    /// Store-assigned row id; `None` until appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub symbol: Symbol,
    /// Storage time.
    pub timestamp: DateTime<Utc>,
    pub payload: Snapshot,
}

/// Outcome of reconciling a fresh snapshot against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Nothing material changed; no record was written.
    NoChange,
    /// A record was written; carries the enriched snapshot.
    Persisted(PersistedRecord),
}

impl Reconciliation {
    pub fn is_no_change(&self) -> bool {
        matches!(self, Reconciliation::NoChange)
    }

    /// Wire shape shared by the API and CLI: `{"status":"no_change"}` or the
    /// enriched snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Reconciliation::NoChange => serde_json::json!({ "status": "no_change" }),
            Reconciliation::Persisted(record) => {
                serde_json::to_value(&record.payload).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}
