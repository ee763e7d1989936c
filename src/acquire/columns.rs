//! Header-driven column discovery for the rendered option-chain table.
//!
//! The table repeats the same labels for calls (left) and puts (right), and
//! the provider has moved columns between UI revisions. Columns are located
//! by keyword: first match for the call side, last match for the put side.
//! Anything not found falls back to the classic fixed layout.

/// Quote fields read from each side of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    OpenInterest,
    ChangeInOpenInterest,
    Volume,
    ImpliedVolatility,
    LastPrice,
}

/// Keyword rule for one field. Labels are compared lowercased with
/// whitespace collapsed; a label matches when it equals or contains a
/// keyword and contains none of the exclusions.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRule {
    pub field: Field,
    pub keywords: &'static [&'static str],
    pub exclude: &'static [&'static str],
}

pub const STRIKE_RULE: &[&str] = &["strike price", "strike"];

pub const SIDE_RULES: [ColumnRule; 5] = [
    ColumnRule {
        field: Field::OpenInterest,
        keywords: &["oi", "open int"],
        exclude: &["chng", "change"],
    },
    ColumnRule {
        field: Field::ChangeInOpenInterest,
        keywords: &["chng in oi", "change in oi"],
        exclude: &[],
    },
    ColumnRule {
        field: Field::Volume,
        keywords: &["volume", "vol"],
        exclude: &["volatility"],
    },
    ColumnRule {
        field: Field::ImpliedVolatility,
        keywords: &["iv", "implied volatility"],
        exclude: &[],
    },
    ColumnRule {
        field: Field::LastPrice,
        keywords: &["ltp", "last price"],
        exclude: &[],
    },
];

/// Rows narrower than this are spacer or summary rows.
pub const MIN_COLUMNS: usize = 15;

const FALLBACK_STRIKE: usize = 11;

fn normalize(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn keyword_match(label: &str, keywords: &[&str], exclude: &[&str]) -> bool {
    let label = normalize(label);
    if label.is_empty() || exclude.iter().any(|x| label.contains(x)) {
        return false;
    }
    keywords.iter().any(|k| label == *k || label.contains(k))
}

impl ColumnRule {
    pub fn matches(&self, label: &str) -> bool {
        keyword_match(label, self.keywords, self.exclude)
    }
}

/// Discovered column positions for one side; `None` means not found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideColumns {
    pub open_interest: Option<usize>,
    pub change_in_open_interest: Option<usize>,
    pub volume: Option<usize>,
    pub implied_volatility: Option<usize>,
    pub last_price: Option<usize>,
}

impl SideColumns {
    fn set(&mut self, field: Field, idx: Option<usize>) {
        match field {
            Field::OpenInterest => self.open_interest = idx,
            Field::ChangeInOpenInterest => self.change_in_open_interest = idx,
            Field::Volume => self.volume = idx,
            Field::ImpliedVolatility => self.implied_volatility = idx,
            Field::LastPrice => self.last_price = idx,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnLayout {
    pub strike: Option<usize>,
    pub call: SideColumns,
    pub put: SideColumns,
}

/// Concrete indices for a row of a given width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideIndices {
    pub open_interest: usize,
    pub change_in_open_interest: usize,
    pub volume: usize,
    pub implied_volatility: usize,
    pub last_price: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub strike: usize,
    pub call: SideIndices,
    pub put: SideIndices,
}

/// Map header labels to column positions.
pub fn discover(headers: &[String]) -> ColumnLayout {
    let strike = headers
        .iter()
        .position(|h| keyword_match(h, STRIKE_RULE, &[]));

    let mut layout = ColumnLayout {
        strike,
        ..Default::default()
    };
    for rule in &SIDE_RULES {
        layout
            .call
            .set(rule.field, headers.iter().position(|h| rule.matches(h)));
        layout
            .put
            .set(rule.field, headers.iter().rposition(|h| rule.matches(h)));
    }
    layout
}

impl ColumnLayout {
    /// Fill gaps with the fixed-layout defaults for a row of `width` cells.
    pub fn resolve(&self, width: usize) -> ResolvedColumns {
        let from_end = |n: usize| width.saturating_sub(n);
        ResolvedColumns {
            strike: self.strike.unwrap_or(FALLBACK_STRIKE),
            call: SideIndices {
                open_interest: self.call.open_interest.unwrap_or(1),
                change_in_open_interest: self.call.change_in_open_interest.unwrap_or(2),
                volume: self.call.volume.unwrap_or(3),
                implied_volatility: self.call.implied_volatility.unwrap_or(4),
                last_price: self.call.last_price.unwrap_or(5),
            },
            put: SideIndices {
                open_interest: self.put.open_interest.unwrap_or_else(|| from_end(2)),
                change_in_open_interest: self
                    .put
                    .change_in_open_interest
                    .unwrap_or_else(|| from_end(3)),
                volume: self.put.volume.unwrap_or_else(|| from_end(4)),
                implied_volatility: self.put.implied_volatility.unwrap_or_else(|| from_end(5)),
                last_price: self.put.last_price.unwrap_or_else(|| from_end(6)),
            },
        }
    }
}
