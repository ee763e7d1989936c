use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::Acquirer;
use crate::model::{Reconciliation, Symbol};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub symbols: Vec<Symbol>,
    /// Pause between symbols within a cycle, on top of the rate limiter.
    pub symbol_gap: Duration,
    pub poll_interval: Duration,
    /// Delay before the first scheduled cycle.
    pub initial_delay: Duration,
    /// Overall bound on an on-demand refresh.
    pub refresh_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            symbols: vec![Symbol::Nifty, Symbol::BankNifty, Symbol::FinNifty],
            symbol_gap: Duration::from_secs(2),
            poll_interval: Duration::from_secs(180),
            initial_delay: Duration::from_secs(10),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub persisted: Vec<Symbol>,
    pub unchanged: Vec<Symbol>,
    pub failed: Vec<Symbol>,
}

#[derive(Debug, Error)]
#[error("refresh for {symbol} did not finish within {timeout:?}")]
pub struct RefreshTimeout {
    pub symbol: Symbol,
    pub timeout: Duration,
}

/// Sequences acquisition over the configured symbols, on a timer or on
/// demand.
pub struct Orchestrator {
    acquirer: Arc<Acquirer>,
    config: OrchestratorConfig,
    cycle_running: AtomicBool,
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Orchestrator {
    pub fn new(acquirer: Arc<Acquirer>, config: OrchestratorConfig) -> Self {
        Self {
            acquirer,
            config,
            cycle_running: AtomicBool::new(false),
        }
    }

    pub fn acquirer(&self) -> &Arc<Acquirer> {
        &self.acquirer
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// One pass over every configured symbol. Returns `None` without doing
    /// anything when a cycle is already in progress.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let Some(_guard) = CycleGuard::try_acquire(&self.cycle_running) else {
            info!("acquisition cycle already in progress, skipping");
            return None;
        };

        info!(symbols = ?self.config.symbols, "acquisition cycle started");
        let mut report = CycleReport::default();
        for (i, symbol) in self.config.symbols.iter().copied().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.symbol_gap).await;
            }
            match self.acquirer.fetch_with_retry(symbol).await {
                Some(Reconciliation::Persisted(_)) => report.persisted.push(symbol),
                Some(Reconciliation::NoChange) => {
                    info!(%symbol, "no material change");
                    report.unchanged.push(symbol);
                }
                None => {
                    warn!(%symbol, "no data obtained this cycle");
                    report.failed.push(symbol);
                }
            }
        }
        info!(
            persisted = report.persisted.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "acquisition cycle finished"
        );
        Some(report)
    }

    /// Acquire one symbol now, outside the cycle schedule.
    ///
    /// On timeout the acquisition keeps running in the background and may
    /// still persist its result.
    pub async fn refresh(
        &self,
        symbol: Symbol,
    ) -> Result<Option<Reconciliation>, RefreshTimeout> {
        let acquirer = self.acquirer.clone();
        let task = tokio::spawn(async move { acquirer.fetch_with_retry(symbol).await });

        match tokio::time::timeout(self.config.refresh_timeout, task).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                error!(%symbol, error = %e, "refresh task failed");
                Ok(None)
            }
            Err(_) => {
                warn!(%symbol, timeout = ?self.config.refresh_timeout, "refresh timed out");
                Err(RefreshTimeout {
                    symbol,
                    timeout: self.config.refresh_timeout,
                })
            }
        }
    }

    /// Run cycles on the poll interval until `shutdown` fires.
    ///
    /// Each tick starts its cycle in the background and a tick landing on a
    /// running cycle is skipped. On shutdown the in-flight cycle is cancelled
    /// and has ended by the time this returns.
    pub async fn run_scheduler(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let first = Instant::now() + self.config.initial_delay;
        let mut ticker = tokio::time::interval_at(first, self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            first_in_secs = self.config.initial_delay.as_secs(),
            "poller started"
        );

        let mut cycle: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if cycle.as_ref().is_some_and(|c| !c.is_finished()) {
                        info!("acquisition cycle already in progress, skipping tick");
                    } else {
                        let orchestrator = self.clone();
                        cycle = Some(tokio::spawn(async move {
                            orchestrator.run_cycle().await;
                        }));
                    }
                }
                _ = shutdown.recv() => {
                    info!("poller stopping");
                    break;
                }
            }
        }

        if let Some(cycle) = cycle {
            if !cycle.is_finished() {
                info!("cancelling in-flight acquisition cycle");
            }
            cycle.abort();
            let _ = cycle.await;
        }
    }
}
