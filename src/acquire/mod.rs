pub mod columns;
pub mod dom;
pub mod extract;
pub mod mock;
pub mod network;
pub mod orchestrator;
pub mod rate_limit;
pub mod retry;

use thiserror::Error;

use crate::session::SessionError;

pub use extract::{Extractor, ExtractorConfig};
pub use mock::MockGenerator;
pub use orchestrator::{CycleReport, Orchestrator, OrchestratorConfig, RefreshTimeout};
pub use rate_limit::RateLimiter;
pub use retry::{Acquirer, LiveSource, RetryPolicy};

/// Why a single acquisition attempt produced no snapshot.
#[derive(Debug, Clone, Error)]
pub enum ExtractionFailure {
    /// Neither strategy produced data within its bound.
    #[error("extraction timed out: {0}")]
    Timeout(String),

    /// Data arrived but did not have the expected shape.
    #[error("unparseable chain data: {0}")]
    Parse(String),

    /// The page rendered but held no usable rows.
    #[error("no chain rows found")]
    NoData,

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ExtractionFailure {
    /// Whether the session should be discarded before the next attempt.
    pub fn breaks_session(&self) -> bool {
        match self {
            ExtractionFailure::Timeout(_) => true,
            ExtractionFailure::Session(e) => e.is_transport(),
            ExtractionFailure::Parse(_) | ExtractionFailure::NoData => false,
        }
    }
}
