use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use super::{Launched, Launcher, Session, SessionError};

type LaunchOutcome = Result<Arc<dyn Session>, SessionError>;

enum Slot {
    Idle,
    /// A launch is in flight; waiters subscribe to its outcome.
    Launching(watch::Receiver<Option<LaunchOutcome>>),
    Ready {
        session: Arc<dyn Session>,
        generation: u64,
    },
}

/// Owns the single shared browser session.
///
/// Callers share one live session. When none is live, the first caller
/// starts a launch and every concurrent caller awaits that same launch.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    launcher: Arc<dyn Launcher>,
    launch_timeout: Duration,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    launches: AtomicU64,
    /// Set by `release_all`; no session is handed out afterwards.
    closing: AtomicBool,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn Launcher>, launch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                launch_timeout,
                slot: Mutex::new(Slot::Idle),
                generation: AtomicU64::new(0),
                launches: AtomicU64::new(0),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Return the live session, launching one if needed.
    pub async fn acquire(&self) -> Result<Arc<dyn Session>, SessionError> {
        let mut rx = {
            let mut slot = self.inner.slot.lock().await;
            if self.inner.closing.load(Ordering::SeqCst) {
                return Err(SessionError::Closed);
            }
            match &*slot {
                Slot::Ready { session, .. } if session.is_connected() => {
                    return Ok(session.clone());
                }
                Slot::Launching(rx) => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Launching(rx.clone());
                    // Detached so a cancelled caller cannot orphan the launch.
                    tokio::spawn(Inner::launch(self.inner.clone(), tx));
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SessionError::Launch("launch task ended without a result".into()))?;
        let outcome: Option<LaunchOutcome> = (*outcome).clone();
        outcome.unwrap_or_else(|| Err(SessionError::Launch("launch produced no outcome".into())))
    }

    /// Drop the cached session so the next `acquire` launches fresh.
    pub async fn invalidate(&self) {
        if let Some(session) = self.take_ready().await {
            info!("discarding browser session");
            if let Err(e) = session.close().await {
                warn!(error = %e, "error closing discarded browser session");
            }
        }
    }

    /// Best-effort shutdown of the live session, bounded by `timeout`.
    ///
    /// A launch still in flight is awaited and its session closed. Every
    /// later `acquire` fails with [`SessionError::Closed`].
    pub async fn release_all(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        self.inner.closing.store(true, Ordering::SeqCst);

        let pending = match &*self.inner.slot.lock().await {
            Slot::Launching(rx) => Some(rx.clone()),
            _ => None,
        };
        if let Some(mut rx) = pending {
            info!("waiting for in-flight browser launch");
            let settled = tokio::time::timeout_at(deadline, rx.wait_for(Option::is_some))
                .await
                .is_ok();
            if !settled {
                warn!(?timeout, "browser launch still pending at shutdown");
            }
        }

        let Some(session) = self.take_ready().await else {
            return;
        };
        match tokio::time::timeout_at(deadline, session.close()).await {
            Ok(Ok(())) => info!("browser session closed"),
            Ok(Err(e)) => warn!(error = %e, "error closing browser session"),
            Err(_) => warn!(?timeout, "browser session close timed out"),
        }
    }

    /// Whether a connected session is currently cached.
    pub async fn is_live(&self) -> bool {
        matches!(&*self.inner.slot.lock().await, Slot::Ready { session, .. } if session.is_connected())
    }

    /// Completed launch attempts, successful or not.
    pub fn launch_count(&self) -> u64 {
        self.inner.launches.load(Ordering::Relaxed)
    }

    async fn take_ready(&self) -> Option<Arc<dyn Session>> {
        let mut slot = self.inner.slot.lock().await;
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Ready { session, .. } => Some(session),
            other => {
                *slot = other;
                None
            }
        }
    }
}

impl Inner {
    async fn launch(inner: Arc<Inner>, tx: watch::Sender<Option<LaunchOutcome>>) {
        let launched = match tokio::time::timeout(inner.launch_timeout, inner.launcher.launch()).await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Launch(format!(
                "launch timed out after {:?}",
                inner.launch_timeout
            ))),
        };
        inner.launches.fetch_add(1, Ordering::Relaxed);

        let mut orphan = None;
        let outcome = {
            let mut slot = inner.slot.lock().await;
            match launched {
                Ok(Launched { session, .. }) if inner.closing.load(Ordering::SeqCst) => {
                    *slot = Slot::Idle;
                    orphan = Some(session);
                    Err(SessionError::Closed)
                }
                Ok(Launched {
                    session,
                    disconnected,
                }) => {
                    let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    *slot = Slot::Ready {
                        session: session.clone(),
                        generation,
                    };
                    tokio::spawn(Inner::watch_disconnect(inner.clone(), generation, disconnected));
                    info!(generation, "browser session launched");
                    Ok(session)
                }
                Err(e) => {
                    // Clear the in-flight marker so the next caller may retry.
                    *slot = Slot::Idle;
                    warn!(error = %e, "browser launch failed");
                    Err(e)
                }
            }
        };

        if let Some(session) = orphan {
            info!("shutdown began during launch, closing new browser session");
            if let Err(e) = session.close().await {
                warn!(error = %e, "error closing browser session");
            }
        }
        let _ = tx.send(Some(outcome));
    }

    async fn watch_disconnect(inner: Arc<Inner>, generation: u64, disconnected: oneshot::Receiver<()>) {
        let _ = disconnected.await;
        let mut slot = inner.slot.lock().await;
        if matches!(&*slot, Slot::Ready { generation: g, .. } if *g == generation) {
            info!(generation, "browser disconnected, clearing session");
            *slot = Slot::Idle;
        }
    }
}
