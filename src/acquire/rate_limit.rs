use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const MIN_INTERVAL: Duration = Duration::from_millis(3000);

/// Global spacing between acquisition attempts, shared by every symbol.
///
/// Waiters are served in arrival order; each one leaves at least
/// `min_interval` after the previous one was released.
pub struct RateLimiter {
    min_interval: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_release: Mutex::new(None),
        }
    }

    /// Block until the caller may start its attempt.
    pub async fn wait_turn(&self) {
        let mut last = self.last_release.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiting");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MIN_INTERVAL)
    }
}
