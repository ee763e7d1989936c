pub mod snapshot;
pub mod symbol;

pub use snapshot::{
    ChainTotals, PersistedRecord, Reconciliation, SideQuote, Snapshot, StrikeRow, strike_key,
};
pub use symbol::Symbol;
