//! The outbound operations: latest, history, refresh. Wires the engine
//! together from an [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::acquire::{
    Acquirer, Extractor, LiveSource, MockGenerator, Orchestrator, RateLimiter, RefreshTimeout,
    RetryPolicy,
};
use crate::config::AppConfig;
use crate::model::{PersistedRecord, Reconciliation, Symbol};
use crate::reconcile::Reconciler;
use crate::session::{ChromeLauncher, Launcher, SessionManager};
use crate::store::{SnapshotStore, StoreError};

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub time: DateTime<Utc>,
    pub db: &'static str,
    pub mock: bool,
}

#[derive(Clone)]
pub struct OiService {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn SnapshotStore>,
}

impl OiService {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    /// Assemble the engine: mock or live acquisition per `config`, the
    /// chromium launcher for live mode.
    pub fn from_config(config: &AppConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let launcher: Arc<dyn Launcher> = Arc::new(ChromeLauncher::new(config.browser.clone()));
        Self::with_launcher(config, store, launcher)
    }

    pub fn with_launcher(
        config: &AppConfig,
        store: Arc<dyn SnapshotStore>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone());
        let acquirer = if config.use_mock {
            Acquirer::mock(MockGenerator, reconciler)
        } else {
            Acquirer::live(
                LiveSource {
                    sessions: SessionManager::new(launcher, LAUNCH_TIMEOUT),
                    limiter: Arc::new(RateLimiter::default()),
                    extractor: Extractor::new(config.extractor.clone()),
                    policy: RetryPolicy::default(),
                },
                reconciler,
            )
        };
        let orchestrator = Orchestrator::new(Arc::new(acquirer), config.orchestrator.clone());
        Self::new(Arc::new(orchestrator), store)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub async fn latest(&self, symbol: Symbol) -> Result<Option<PersistedRecord>, StoreError> {
        self.store.latest(symbol).await
    }

    /// Oldest first; `None` returns everything.
    pub async fn history(
        &self,
        symbol: Symbol,
        limit: Option<usize>,
    ) -> Result<Vec<PersistedRecord>, StoreError> {
        self.store.history(symbol, limit).await
    }

    pub async fn refresh(&self, symbol: Symbol) -> Result<Option<Reconciliation>, RefreshTimeout> {
        self.orchestrator.refresh(symbol).await
    }

    pub async fn health(&self) -> Health {
        Health {
            status: "ok",
            time: Utc::now(),
            db: if self.store.ping().await.is_ok() {
                "connected"
            } else {
                "disconnected"
            },
            mock: self.orchestrator.acquirer().is_mock(),
        }
    }

    /// Bounded, best-effort teardown of the browser session.
    pub async fn shutdown(&self, timeout: Duration) {
        if let Some(sessions) = self.orchestrator.acquirer().sessions() {
            sessions.release_all(timeout).await;
        }
    }
}
