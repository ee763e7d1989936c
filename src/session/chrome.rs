//! Chromium-backed session, driven over the DevTools protocol.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams, Headers,
    ResourceType, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{
    ChainPage, Launched, Launcher, ResourceKind, ResponseCapture, ResponseFilter, Session,
    SessionError,
};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Hides the most common automation markers before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = { runtime: {} };
"#;

/// Browser process settings.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: PathBuf,
    /// Sent as `Referer` on every navigation.
    pub referer: String,
    pub window: (u32, u32),
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/bin/google-chrome-stable"),
            referer: "https://www.nseindia.com".to_string(),
            window: (1920, 1080),
        }
    }
}

pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

fn protocol(err: CdpError) -> SessionError {
    match err {
        CdpError::Timeout => SessionError::NavigationTimeout,
        other => SessionError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self) -> Result<Launched, SessionError> {
        let (width, height) = self.settings.window;
        let config = BrowserConfig::builder()
            .chrome_executable(&self.settings.executable)
            .no_sandbox()
            .window_size(width, height)
            .viewport(None)
            .args([
                "--disable-setuid-sandbox",
                "--disable-dev-shm-usage",
                "--disable-accelerated-2d-canvas",
                "--disable-gpu",
                "--disable-blink-features=AutomationControlled",
            ])
            .build()
            .map_err(SessionError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = oneshot::channel();
        let flag = connected.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "devtools handler error");
                }
            }
            flag.store(false, Ordering::SeqCst);
            let _ = tx.send(());
        });

        let session = ChromeSession {
            browser: Mutex::new(browser),
            connected,
            referer: self.settings.referer.clone(),
        };
        Ok(Launched {
            session: Arc::new(session),
            disconnected: rx,
        })
    }
}

// ── Session ─────────────────────────────────────────────────────────

struct ChromeSession {
    browser: Mutex<Browser>,
    connected: Arc<AtomicBool>,
    referer: String,
}

#[async_trait]
impl Session for ChromeSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_page(&self) -> Result<Box<dyn ChainPage>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(protocol)?
        };

        let prepared = async {
            page.execute(SetUserAgentOverrideParams::new(USER_AGENT)).await?;
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
                .await?;
            let headers = Headers::new(serde_json::json!({
                "Accept-Language": "en-US,en;q=0.9",
                "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                "Referer": self.referer,
                "Upgrade-Insecure-Requests": "1",
            }));
            page.execute(SetExtraHttpHeadersParams::new(headers)).await?;
            Ok::<(), CdpError>(())
        }
        .await;

        if let Err(e) = prepared {
            let _ = page.close().await;
            return Err(protocol(e));
        }

        Ok(Box::new(ChromePage {
            page: Some(page),
            tasks: Vec::new(),
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(protocol)?;
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "waiting for browser process");
        }
        Ok(())
    }
}

// ── Page ────────────────────────────────────────────────────────────

struct ChromePage {
    page: Option<Page>,
    /// Background event listeners tied to this page's lifetime.
    tasks: Vec<JoinHandle<()>>,
}

impl ChromePage {
    fn page(&self) -> Result<&Page, SessionError> {
        self.page.as_ref().ok_or(SessionError::Closed)
    }
}

fn resource_type(kind: ResourceKind) -> ResourceType {
    match kind {
        ResourceKind::Image => ResourceType::Image,
        ResourceKind::Stylesheet => ResourceType::Stylesheet,
        ResourceKind::Font => ResourceType::Font,
        ResourceKind::Media => ResourceType::Media,
    }
}

fn decode_body(body: String, base64_encoded: bool) -> Option<String> {
    if !base64_encoded {
        return Some(body);
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(body).ok()?;
    String::from_utf8(bytes).ok()
}

#[async_trait]
impl ChainPage for ChromePage {
    async fn block_resources(&mut self, kinds: &[ResourceKind]) -> Result<(), SessionError> {
        let page = self.page()?.clone();
        let patterns: Vec<RequestPattern> = kinds
            .iter()
            .map(|k| RequestPattern::builder().resource_type(resource_type(*k)).build())
            .collect();

        // Only the suppressed kinds are paused, so every paused request is failed.
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(protocol)?;
        page.execute(fetch::EnableParams::builder().patterns(patterns).build())
            .await
            .map_err(protocol)?;

        let handle = page.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let fail =
                    FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
                if let Err(e) = handle.execute(fail).await {
                    debug!(error = %e, "failed to abort sub-resource");
                }
            }
        }));
        Ok(())
    }

    async fn capture_response(
        &mut self,
        filter: ResponseFilter,
    ) -> Result<ResponseCapture, SessionError> {
        let page = self.page()?.clone();
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(protocol)?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(protocol)?;

        let (tx, rx) = oneshot::channel();
        self.tasks.push(tokio::spawn(async move {
            let request_id = loop {
                let Some(event) = responses.next().await else {
                    return;
                };
                if filter.matches(&event.response.url, event.response.status) {
                    debug!(url = %event.response.url, "matched provider response");
                    break event.request_id.clone();
                }
            };
            // The body is only retrievable once loading has finished.
            loop {
                let Some(done) = finished.next().await else {
                    return;
                };
                if done.request_id == request_id {
                    break;
                }
            }
            match page.execute(GetResponseBodyParams::new(request_id)).await {
                Ok(resp) => {
                    let body = resp.result.body.clone();
                    if let Some(text) = decode_body(body, resp.result.base64_encoded) {
                        let _ = tx.send(text);
                    }
                }
                Err(e) => debug!(error = %e, "could not read intercepted response body"),
            }
        }));
        Ok(rx)
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.page()?.goto(url).await.map_err(protocol)?;
        Ok(())
    }

    async fn count_matches(&mut self, selector: &str) -> Result<usize, SessionError> {
        let quoted = serde_json::to_string(selector)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        let script = format!("document.querySelectorAll({quoted}).length");
        let value = self.evaluate(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, SessionError> {
        let result = self.page()?.evaluate(script).await.map_err(protocol)?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn close(mut self: Box<Self>) -> Result<(), SessionError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        match self.page.take() {
            Some(page) => page.close().await.map_err(protocol),
            None => Ok(()),
        }
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // Reached when the owning future was cancelled before `close`.
        if let Some(page) = self.page.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move {
                        if let Err(e) = page.close().await {
                            debug!(error = %e, "closing abandoned page");
                        }
                    });
                }
                Err(_) => warn!("page dropped outside a runtime; tab left open"),
            }
        }
    }
}
