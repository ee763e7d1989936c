use serde::Deserialize;
use tracing::debug;

use super::columns::{self, MIN_COLUMNS, SideIndices};
use crate::model::{SideQuote, StrikeRow};

pub const ROW_SELECTOR: &str = "#optionChainTable-indices tbody tr";

/// Collects the raw text of the rendered chain. Every lookup is guarded so a
/// missing element yields an empty value instead of a script error.
pub const SCRAPE_SCRIPT: &str = r#"(() => {
  const text = (el) => (el && el.innerText ? el.innerText : '');
  const cells = (row, tag) => Array.from(row ? row.querySelectorAll(tag) : []).map(text);
  const table = document.querySelector('#optionChainTable-indices');
  const spotEl = document.querySelector('#equity_underlyingVal')
    || document.querySelector('.underlying-value')
    || document.querySelector('span[id*="underlying"]');
  const timeEl = document.querySelector('#asondate') || document.querySelector('.run_time');
  return {
    found: !!table,
    spotText: spotEl ? text(spotEl) : null,
    headerRows: table ? Array.from(table.querySelectorAll('thead tr')).map((r) => cells(r, 'th')) : [],
    rows: table ? Array.from(table.querySelectorAll('tbody tr')).map((r) => cells(r, 'td')) : [],
    asOf: timeEl ? text(timeEl) : null,
  };
})()"#;

/// Raw text pulled out of the page by [`SCRAPE_SCRIPT`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderedTable {
    pub found: bool,
    pub spot_text: Option<String>,
    pub header_rows: Vec<Vec<String>>,
    pub rows: Vec<Vec<String>>,
    pub as_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub underlying_value: f64,
    pub rows: Vec<StrikeRow>,
    pub source_timestamp: Option<String>,
}

/// Lenient numeric parse: thousands separators are dropped, the longest
/// numeric prefix is used, and anything unparseable is zero.
pub fn parse_number(raw: &str) -> f64 {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in cleaned.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return 0.0;
    }
    cleaned[..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .unwrap_or(0.0)
}

/// Spot label text such as "NIFTY 19,510.35" → 19510.35.
pub fn parse_spot(raw: &str) -> f64 {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    parse_number(&digits)
}

/// "As on 19-Oct-2026 15:30:00 IST" → "19-Oct-2026 15:30:00 IST".
pub fn parse_as_of(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stamp = trimmed.strip_prefix("As on").unwrap_or(trimmed).trim();
    (!stamp.is_empty()).then(|| stamp.to_string())
}

/// The column labels live in the second header row; older layouts only
/// have one.
fn pick_headers(header_rows: &[Vec<String>]) -> &[String] {
    match header_rows.get(1) {
        Some(row) if !row.is_empty() => row,
        _ => header_rows.first().map(Vec::as_slice).unwrap_or(&[]),
    }
}

fn side(cells: &[String], idx: &SideIndices) -> SideQuote {
    let cell = |i: usize| cells.get(i).map(|s| parse_number(s)).unwrap_or(0.0);
    SideQuote {
        open_interest: cell(idx.open_interest),
        change_in_open_interest: cell(idx.change_in_open_interest),
        volume: cell(idx.volume),
        last_price: cell(idx.last_price),
        implied_volatility: cell(idx.implied_volatility),
        ..Default::default()
    }
}

pub fn parse_table(table: &RenderedTable) -> ParsedTable {
    let headers = pick_headers(&table.header_rows);
    let layout = columns::discover(headers);
    debug!(?headers, ?layout, "detected table headers");

    let rows: Vec<StrikeRow> = table
        .rows
        .iter()
        .filter(|cells| cells.len() >= MIN_COLUMNS)
        .filter_map(|cells| {
            let idx = layout.resolve(cells.len());
            let strike = cells
                .get(idx.strike)
                .map(|s| parse_number(s))
                .unwrap_or(0.0);
            (strike > 0.0).then(|| {
                StrikeRow::new(strike, side(cells, &idx.call), side(cells, &idx.put))
            })
        })
        .collect();

    ParsedTable {
        underlying_value: table.spot_text.as_deref().map(parse_spot).unwrap_or(0.0),
        rows,
        source_timestamp: table.as_of.as_deref().and_then(parse_as_of),
    }
}
