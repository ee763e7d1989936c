use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dom::{self, RenderedTable, ROW_SELECTOR, SCRAPE_SCRIPT};
use super::{network, ExtractionFailure};
use crate::model::{Snapshot, Symbol};
use crate::session::{ChainPage, ResourceKind, ResponseCapture, ResponseFilter, Session, SessionError};

const DOM_STAMP_FORMAT: &str = "%d-%b-%Y %H:%M:%S";

/// Timing and target settings for one extraction attempt.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Human-facing chain page; the symbol is appended as a query parameter.
    pub page_url: String,
    /// URL fragment identifying the provider's chain endpoint.
    pub api_match: String,
    pub intercept_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Pause after navigation for client-side rendering.
    pub settle: Duration,
    pub dom_wait: Duration,
    pub dom_poll: Duration,
    pub close_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            page_url: "https://www.nseindia.com/option-chain".to_string(),
            api_match: "api/option-chain-indices".to_string(),
            intercept_timeout: Duration::from_secs(25),
            navigation_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(2),
            dom_wait: Duration::from_secs(10),
            dom_poll: Duration::from_millis(250),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl ExtractorConfig {
    pub fn page_url_for(&self, symbol: Symbol) -> String {
        let sep = if self.page_url.contains('?') { '&' } else { '?' };
        format!("{}{sep}symbol={symbol}", self.page_url)
    }

    pub fn response_filter(&self, symbol: Symbol) -> ResponseFilter {
        ResponseFilter {
            url_fragments: vec![self.api_match.clone(), format!("symbol={symbol}")],
            status: 200,
        }
    }
}

/// Performs one acquisition attempt: network interception first, then the
/// rendered table.
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract one snapshot. The page opened for the attempt is closed on
    /// every exit path, including deadline expiry.
    pub async fn extract(
        &self,
        session: &dyn Session,
        symbol: Symbol,
        deadline: Instant,
    ) -> Result<Snapshot, ExtractionFailure> {
        let mut page = session.open_page().await?;

        let result = match tokio::time::timeout_at(deadline, self.run(page.as_mut(), symbol)).await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionFailure::Timeout("attempt deadline elapsed".into())),
        };

        match tokio::time::timeout(self.config.close_timeout, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(%symbol, error = %e, "error closing page"),
            Err(_) => warn!(%symbol, "page close timed out"),
        }
        result
    }

    async fn run(
        &self,
        page: &mut dyn ChainPage,
        symbol: Symbol,
    ) -> Result<Snapshot, ExtractionFailure> {
        page.block_resources(&ResourceKind::NON_ESSENTIAL).await?;
        let capture = page.capture_response(self.config.response_filter(symbol)).await?;
        let intercept_deadline = Instant::now() + self.config.intercept_timeout;

        self.navigate(page, symbol).await?;
        tokio::time::sleep(self.config.settle).await;

        // ── Phase 1: network interception ──
        let mut parse_error = None;
        match Self::await_capture(capture, intercept_deadline).await {
            Some(body) => match network::normalize(symbol, &body) {
                Ok(snapshot) if !snapshot.rows.is_empty() => {
                    info!(%symbol, rows = snapshot.rows.len(), "captured provider response");
                    return Ok(snapshot);
                }
                Ok(_) => debug!(%symbol, "provider response held no rows"),
                Err(e) => {
                    warn!(%symbol, error = %e, "intercepted body unusable");
                    parse_error = Some(e);
                }
            },
            None => info!(%symbol, "no provider response intercepted, falling back to table"),
        }

        // ── Phase 2: rendered table ──
        if !self.wait_for_rows(page).await? {
            debug!(%symbol, "timed out waiting for table rows");
        }
        let raw = page.evaluate(SCRAPE_SCRIPT).await?;
        let table: RenderedTable = serde_json::from_value(raw)
            .map_err(|e| ExtractionFailure::Parse(format!("table script output: {e}")))?;

        if !table.found {
            return Err(parse_error
                .unwrap_or_else(|| ExtractionFailure::Timeout("chain table never rendered".into())));
        }

        let parsed = dom::parse_table(&table);
        debug!(%symbol, raw_rows = table.rows.len(), rows = parsed.rows.len(), "parsed table");
        if parsed.rows.is_empty() {
            return Err(ExtractionFailure::NoData);
        }

        let mut snapshot = Snapshot::new(symbol, parsed.underlying_value, parsed.rows);
        // A page without an "as of" label is stamped with its capture time.
        snapshot.source_timestamp = parsed.source_timestamp.or_else(|| {
            debug!(%symbol, "no as-of label, using capture time");
            Some(snapshot.captured_at.format(DOM_STAMP_FORMAT).to_string())
        });
        snapshot.dedup_strikes();
        info!(%symbol, rows = snapshot.rows.len(), "scraped chain table");
        Ok(snapshot)
    }

    /// A navigation timeout is tolerated: the page often has what we need
    /// before the load event fires.
    async fn navigate(&self, page: &mut dyn ChainPage, symbol: Symbol) -> Result<(), ExtractionFailure> {
        let url = self.config.page_url_for(symbol);
        match tokio::time::timeout(self.config.navigation_timeout, page.navigate(&url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(SessionError::NavigationTimeout)) | Err(_) => {
                info!(%symbol, "navigation timed out, continuing");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn await_capture(capture: ResponseCapture, deadline: Instant) -> Option<String> {
        match tokio::time::timeout_at(deadline, capture).await {
            Ok(Ok(body)) => Some(body),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Poll until at least one body row exists or `dom_wait` elapses.
    async fn wait_for_rows(&self, page: &mut dyn ChainPage) -> Result<bool, ExtractionFailure> {
        let until = Instant::now() + self.config.dom_wait;
        loop {
            if page.count_matches(ROW_SELECTOR).await? > 0 {
                return Ok(true);
            }
            if Instant::now() >= until {
                return Ok(false);
            }
            tokio::time::sleep(self.config.dom_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::sync::oneshot;

    use super::*;

    #[derive(Clone)]
    struct Script {
        body: Option<String>,
        rows_visible: usize,
        table: Value,
        navigate: Result<(), SessionError>,
    }

    struct ScriptedPage {
        script: Script,
        closed: Arc<AtomicUsize>,
        held: Option<oneshot::Sender<String>>,
    }

    #[async_trait]
    impl ChainPage for ScriptedPage {
        async fn block_resources(&mut self, _: &[ResourceKind]) -> Result<(), SessionError> {
            Ok(())
        }

        async fn capture_response(
            &mut self,
            _: ResponseFilter,
        ) -> Result<ResponseCapture, SessionError> {
            let (tx, rx) = oneshot::channel();
            match self.script.body.clone() {
                Some(body) => {
                    let _ = tx.send(body);
                }
                None => self.held = Some(tx),
            }
            Ok(rx)
        }

        async fn navigate(&mut self, _: &str) -> Result<(), SessionError> {
            self.script.navigate.clone()
        }

        async fn count_matches(&mut self, _: &str) -> Result<usize, SessionError> {
            Ok(self.script.rows_visible)
        }

        async fn evaluate(&mut self, _: &str) -> Result<Value, SessionError> {
            Ok(self.script.table.clone())
        }

        async fn close(self: Box<Self>) -> Result<(), SessionError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedSession {
        script: Script,
        closed: Arc<AtomicUsize>,
        connected: AtomicBool,
    }

    impl ScriptedSession {
        fn new(script: Script) -> Self {
            Self {
                script,
                closed: Arc::new(AtomicUsize::new(0)),
                connected: AtomicBool::new(true),
            }
        }

        fn pages_closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Session for ScriptedSession {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn open_page(&self) -> Result<Box<dyn ChainPage>, SessionError> {
            Ok(Box::new(ScriptedPage {
                script: self.script.clone(),
                closed: self.closed.clone(),
                held: None,
            }))
        }

        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn provider_body() -> String {
        json!({
            "records": {
                "timestamp": "19-Oct-2026 15:30:00",
                "underlyingValue": 19510.0,
                "data": [{ "strikePrice": 19500, "CE": { "openInterest": 1000 } }]
            }
        })
        .to_string()
    }

    fn row(strike: &str, call_oi: &str) -> Vec<String> {
        let mut cells = vec!["0".to_string(); 23];
        cells[1] = call_oi.to_string();
        cells[11] = strike.to_string();
        cells[21] = "400".to_string();
        cells
    }

    fn rendered(rows: Vec<Vec<String>>) -> Value {
        json!({
            "found": true,
            "spotText": "19,510.00",
            "headerRows": [],
            "rows": rows,
            "asOf": "As on 19-Oct-2026 15:31:00 IST"
        })
    }

    fn script() -> Script {
        Script {
            body: None,
            rows_visible: 0,
            table: json!({ "found": false }),
            navigate: Ok(()),
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(ExtractorConfig::default())
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[tokio::test(start_paused = true)]
    async fn intercepted_response_wins() {
        let session = ScriptedSession::new(Script {
            body: Some(provider_body()),
            ..script()
        });
        let start = Instant::now();
        let snap = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap();

        assert_eq!(snap.rows.len(), 1);
        assert_eq!(snap.rows[0].call.open_interest, 1000.0);
        assert_eq!(snap.source_timestamp.as_deref(), Some("19-Oct-2026 15:30:00"));
        // Only the settle pause elapsed.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(session.pages_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_table_after_interception_window() {
        let session = ScriptedSession::new(Script {
            rows_visible: 2,
            table: rendered(vec![row("19,500", "1,000"), row("19,550", "700")]),
            ..script()
        });
        let start = Instant::now();
        let snap = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(25));
        assert_eq!(snap.underlying_value, 19_510.0);
        assert_eq!(snap.rows.len(), 2);
        assert_eq!(snap.rows[0].call.open_interest, 1000.0);
        assert_eq!(snap.rows[1].put.open_interest, 400.0);
        assert_eq!(snap.source_timestamp.as_deref(), Some("19-Oct-2026 15:31:00 IST"));
        assert_eq!(session.pages_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn table_without_as_of_label_is_stamped_at_capture() {
        let mut table = rendered(vec![row("19,500", "1,000")]);
        table["asOf"] = Value::Null;
        let session = ScriptedSession::new(Script {
            rows_visible: 1,
            table,
            ..script()
        });
        let snap = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap();

        let expected = snap.captured_at.format("%d-%b-%Y %H:%M:%S").to_string();
        assert_eq!(snap.source_timestamp.as_deref(), Some(expected.as_str()));
        assert_eq!(snap.rows.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_body_without_table_is_parse_failure() {
        let session = ScriptedSession::new(Script {
            body: Some("<html>Access Denied</html>".into()),
            ..script()
        });
        let err = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::Parse(_)));
        assert!(!err.breaks_session());
        assert_eq!(session.pages_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_rendered_is_timeout() {
        let session = ScriptedSession::new(script());
        let start = Instant::now();
        let err = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::Timeout(_)));
        assert!(err.breaks_session());
        // Interception window plus the bounded row wait.
        assert!(start.elapsed() >= Duration::from_secs(35));
        assert_eq!(session.pages_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_table_is_no_data() {
        let session = ScriptedSession::new(Script {
            table: rendered(vec![vec!["No Records".into()]]),
            ..script()
        });
        let err = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::NoData));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_timeout_is_tolerated() {
        let session = ScriptedSession::new(Script {
            body: Some(provider_body()),
            navigate: Err(SessionError::NavigationTimeout),
            ..script()
        });
        assert!(extractor().extract(&session, Symbol::Nifty, far()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_error_propagates_and_closes_page() {
        let session = ScriptedSession::new(Script {
            navigate: Err(SessionError::Protocol("Target closed".into())),
            ..script()
        });
        let err = extractor().extract(&session, Symbol::Nifty, far()).await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::Session(SessionError::Protocol(_))));
        assert_eq!(session.pages_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_deadline_bounds_extraction() {
        let session = ScriptedSession::new(script());
        let start = Instant::now();
        let deadline = start + Duration::from_secs(5);
        let err = extractor().extract(&session, Symbol::Nifty, deadline).await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::Timeout(_)));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(session.pages_closed(), 1);
    }

    #[test]
    fn page_url_and_filter_carry_symbol() {
        let config = ExtractorConfig::default();
        assert_eq!(
            config.page_url_for(Symbol::BankNifty),
            "https://www.nseindia.com/option-chain?symbol=BANKNIFTY"
        );
        let filter = config.response_filter(Symbol::Nifty);
        assert!(filter.matches(
            "https://www.nseindia.com/api/option-chain-indices?symbol=NIFTY",
            200
        ));
        assert!(!filter.matches(
            "https://www.nseindia.com/api/option-chain-indices?symbol=BANKNIFTY",
            200
        ));
    }
}
