//! Normalization of the provider's option-chain JSON.

use serde::Deserialize;

use super::ExtractionFailure;
use crate::model::{SideQuote, Snapshot, StrikeRow, Symbol};

// ── Provider wire shape ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChainPayload {
    pub records: Records,
    #[serde(default)]
    pub filtered: Option<Filtered>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Records {
    pub expiry_dates: Vec<String>,
    pub data: Vec<ProviderRow>,
    pub timestamp: Option<String>,
    pub underlying_value: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Filtered {
    pub data: Vec<ProviderRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderRow {
    pub strike_price: f64,
    pub expiry_date: Option<String>,
    #[serde(rename = "CE")]
    pub call: Option<ProviderQuote>,
    #[serde(rename = "PE")]
    pub put: Option<ProviderQuote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderQuote {
    pub open_interest: f64,
    #[serde(rename = "changeinOpenInterest")]
    pub change_in_open_interest: f64,
    pub total_traded_volume: f64,
    pub last_price: f64,
    pub implied_volatility: f64,
}

impl From<&ProviderQuote> for SideQuote {
    fn from(q: &ProviderQuote) -> Self {
        SideQuote {
            open_interest: q.open_interest,
            change_in_open_interest: q.change_in_open_interest,
            volume: q.total_traded_volume,
            last_price: q.last_price,
            implied_volatility: q.implied_volatility,
            ..Default::default()
        }
    }
}

fn quote(side: &Option<ProviderQuote>) -> SideQuote {
    side.as_ref().map(SideQuote::from).unwrap_or_default()
}

impl ProviderRow {
    fn to_row(&self) -> StrikeRow {
        StrikeRow {
            strike_price: self.strike_price,
            expiry_date: self.expiry_date.clone(),
            call: quote(&self.call),
            put: quote(&self.put),
        }
    }
}

// ── Normalization ───────────────────────────────────────────────────

/// Parse an intercepted body into a snapshot.
///
/// The full payload lists every expiry. The provider's `filtered` view
/// (nearest expiry) is used when present; otherwise rows are narrowed to
/// the first listed expiry. Strikes are deduplicated in either case.
pub fn normalize(symbol: Symbol, body: &str) -> Result<Snapshot, ExtractionFailure> {
    let payload: ChainPayload = serde_json::from_str(body)
        .map_err(|e| ExtractionFailure::Parse(format!("provider payload: {e}")))?;
    Ok(from_payload(symbol, payload))
}

pub fn from_payload(symbol: Symbol, payload: ChainPayload) -> Snapshot {
    let ChainPayload { records, filtered } = payload;

    let rows: Vec<StrikeRow> = match filtered {
        Some(f) if !f.data.is_empty() => f.data.iter().map(ProviderRow::to_row).collect(),
        _ => {
            let nearest = records.expiry_dates.first();
            records
                .data
                .iter()
                .filter(|r| match (nearest, &r.expiry_date) {
                    (Some(want), Some(have)) => want == have,
                    _ => true,
                })
                .map(ProviderRow::to_row)
                .collect()
        }
    };

    let mut snapshot = Snapshot::new(symbol, records.underlying_value.unwrap_or(0.0), rows);
    snapshot.rows.retain(|r| r.strike_price > 0.0);
    snapshot.dedup_strikes();
    snapshot.source_timestamp = records.timestamp.filter(|t| !t.trim().is_empty());
    snapshot.expiry_dates = records.expiry_dates;
    snapshot
}
