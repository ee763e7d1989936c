pub mod chrome;
pub mod manager;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

pub use chrome::{BrowserSettings, ChromeLauncher};
pub use manager::SessionManager;

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("navigation timeout")]
    NavigationTimeout,

    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Whether the underlying session should be thrown away before reuse.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(_) | SessionError::NavigationTimeout | SessionError::Closed
        )
    }
}

// ── Page abstraction ────────────────────────────────────────────────

/// Sub-resource classes that can be suppressed on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Stylesheet,
    Font,
    Media,
}

impl ResourceKind {
    pub const NON_ESSENTIAL: [ResourceKind; 4] = [
        ResourceKind::Image,
        ResourceKind::Stylesheet,
        ResourceKind::Font,
        ResourceKind::Media,
    ];
}

/// Selects which network response a page should capture.
#[derive(Debug, Clone)]
pub struct ResponseFilter {
    /// Every fragment must appear in the response URL.
    pub url_fragments: Vec<String>,
    pub status: i64,
}

impl ResponseFilter {
    pub fn matches(&self, url: &str, status: i64) -> bool {
        status == self.status && self.url_fragments.iter().all(|f| url.contains(f.as_str()))
    }
}

/// Resolves with the body of the first response matching a [`ResponseFilter`].
/// Dropped without a value when the page goes away first.
pub type ResponseCapture = oneshot::Receiver<String>;

/// One isolated tab bound to a session. Closed exactly once by its owner.
#[async_trait]
pub trait ChainPage: Send {
    async fn block_resources(&mut self, kinds: &[ResourceKind]) -> Result<(), SessionError>;

    /// Start watching network responses. Must be armed before `navigate`.
    async fn capture_response(
        &mut self,
        filter: ResponseFilter,
    ) -> Result<ResponseCapture, SessionError>;

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Number of elements currently matching a CSS selector.
    async fn count_matches(&mut self, selector: &str) -> Result<usize, SessionError>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, SessionError>;

    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

// ── Session abstraction ─────────────────────────────────────────────

/// A long-lived automation context that can open isolated pages.
#[async_trait]
pub trait Session: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn open_page(&self) -> Result<Box<dyn ChainPage>, SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

/// A freshly launched session plus its disconnection signal.
pub struct Launched {
    pub session: Arc<dyn Session>,
    /// Fires (or is dropped) when the transport goes away.
    pub disconnected: oneshot::Receiver<()>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Launched, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_all_fragments_and_status() {
        let filter = ResponseFilter {
            url_fragments: vec!["api/option-chain-indices".into(), "BANKNIFTY".into()],
            status: 200,
        };
        let url = "https://www.nseindia.com/api/option-chain-indices?symbol=BANKNIFTY";
        assert!(filter.matches(url, 200));
        assert!(!filter.matches(url, 401));
        assert!(!filter.matches(
            "https://www.nseindia.com/api/option-chain-indices?symbol=NIFTY",
            200
        ));
    }
}
