use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{ExtractionFailure, Extractor, MockGenerator, RateLimiter};
use crate::model::{Reconciliation, Snapshot, Symbol};
use crate::reconcile::Reconciler;
use crate::session::SessionManager;

/// Bounded exponential backoff for live acquisition.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Upper bound on one attempt, including page setup.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failed attempt with zero-based index `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Everything live acquisition needs.
pub struct LiveSource {
    pub sessions: SessionManager,
    pub limiter: Arc<RateLimiter>,
    pub extractor: Extractor,
    pub policy: RetryPolicy,
}

enum Source {
    Live(LiveSource),
    Mock(MockGenerator),
}

/// Fetch-with-retry followed by reconciliation.
///
/// `None` from [`Acquirer::fetch_with_retry`] means no data was obtained at
/// all (or the outcome could not be stored). It is distinct from
/// [`Reconciliation::NoChange`].
pub struct Acquirer {
    source: Source,
    reconciler: Reconciler,
}

impl Acquirer {
    pub fn live(source: LiveSource, reconciler: Reconciler) -> Self {
        Self {
            source: Source::Live(source),
            reconciler,
        }
    }

    /// Bypasses the browser entirely.
    pub fn mock(generator: MockGenerator, reconciler: Reconciler) -> Self {
        Self {
            source: Source::Mock(generator),
            reconciler,
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.source, Source::Mock(_))
    }

    pub fn sessions(&self) -> Option<&SessionManager> {
        match &self.source {
            Source::Live(live) => Some(&live.sessions),
            Source::Mock(_) => None,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn fetch_with_retry(&self, symbol: Symbol) -> Option<Reconciliation> {
        let snapshot = match &self.source {
            Source::Mock(generator) => {
                info!(%symbol, "using mock data");
                generator.generate(symbol)
            }
            Source::Live(live) => live.acquire(symbol).await?,
        };

        match self.reconciler.reconcile(snapshot).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(%symbol, error = %e, "reconciliation failed; result dropped");
                None
            }
        }
    }
}

impl LiveSource {
    async fn acquire(&self, symbol: Symbol) -> Option<Snapshot> {
        let attempts = self.policy.max_retries + 1;
        for attempt in 0..attempts {
            self.limiter.wait_turn().await;

            let failure = match self.attempt(symbol).await {
                Ok(snapshot) => return Some(snapshot),
                Err(failure) => failure,
            };
            warn!(%symbol, attempt = attempt + 1, error = %failure, "acquisition attempt failed");

            if attempt + 1 == attempts {
                break;
            }
            let backoff = self.policy.backoff(attempt);
            info!(%symbol, backoff_ms = backoff.as_millis() as u64, "retrying");
            tokio::time::sleep(backoff).await;

            if failure.breaks_session() {
                info!(%symbol, "discarding session before retry");
                self.sessions.invalidate().await;
            }
        }

        error!(%symbol, attempts, "acquisition failed after retries");
        None
    }

    async fn attempt(&self, symbol: Symbol) -> Result<Snapshot, ExtractionFailure> {
        let session = self.sessions.acquire().await?;
        let deadline = Instant::now() + self.policy.attempt_timeout;
        self.extractor.extract(session.as_ref(), symbol, deadline).await
    }
}
