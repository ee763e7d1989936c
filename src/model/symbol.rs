use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Index underlyings whose option chains are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Symbol {
    Nifty,
    BankNifty,
    FinNifty,
    MidcpNifty,
}

impl Symbol {
    pub const ALL: [Symbol; 4] = [
        Symbol::Nifty,
        Symbol::BankNifty,
        Symbol::FinNifty,
        Symbol::MidcpNifty,
    ];

    /// Identifier as it appears in provider URLs and stored records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Nifty => "NIFTY",
            Symbol::BankNifty => "BANKNIFTY",
            Symbol::FinNifty => "FINNIFTY",
            Symbol::MidcpNifty => "MIDCPNIFTY",
        }
    }

    /// Approximate spot level used to centre synthetic chains.
    pub fn reference_price(&self) -> f64 {
        match self {
            Symbol::Nifty => 19_500.0,
            Symbol::BankNifty => 44_500.0,
            Symbol::FinNifty => 19_800.0,
            Symbol::MidcpNifty => 9_800.0,
        }
    }

    /// Distance between adjacent listed strikes.
    pub fn strike_step(&self) -> f64 {
        match self {
            Symbol::BankNifty => 100.0,
            Symbol::MidcpNifty => 25.0,
            Symbol::Nifty | Symbol::FinNifty => 50.0,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown symbol `{0}` (expected one of NIFTY, BANKNIFTY, FINNIFTY, MIDCPNIFTY)")]
pub struct UnknownSymbol(pub String);

impl FromStr for Symbol {
    type Err = UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Symbol::ALL
            .into_iter()
            .find(|sym| sym.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownSymbol(wanted.to_string()))
    }
}
