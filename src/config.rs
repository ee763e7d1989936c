use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::acquire::{ExtractorConfig, OrchestratorConfig};
use crate::model::Symbol;
use crate::session::BrowserSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: unknown symbol '{value}'")]
    Symbol { var: &'static str, value: String },

    #[error("{var}: expected a positive number of seconds, got '{value}'")]
    Interval { var: &'static str, value: String },

    #[error("{var}: symbol list is empty")]
    NoSymbols { var: &'static str },
}

/// Runtime configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub use_mock: bool,
    pub db_path: PathBuf,
    pub browser: BrowserSettings,
    pub extractor: ExtractorConfig,
    pub orchestrator: OrchestratorConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup; unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let use_mock = var("USE_MOCK_DATA")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut browser = BrowserSettings::default();
        if let Some(path) = var("CHROME_PATH") {
            browser.executable = PathBuf::from(path);
        }

        let mut extractor = ExtractorConfig::default();
        if let Some(url) = var("OPTION_CHAIN_URL") {
            extractor.page_url = url;
        }
        if let Some(fragment) = var("NSE_API_MATCH") {
            extractor.api_match = fragment;
        }

        let mut orchestrator = OrchestratorConfig::default();
        if let Some(list) = var("OI_SYMBOLS") {
            orchestrator.symbols = parse_symbols("OI_SYMBOLS", &list)?;
        }
        if let Some(secs) = var("POLL_INTERVAL_SECS") {
            orchestrator.poll_interval = parse_secs("POLL_INTERVAL_SECS", &secs)?;
        }

        Ok(AppConfig {
            use_mock,
            db_path: var("OI_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("oi-tracker.db")),
            browser,
            extractor,
            orchestrator,
        })
    }
}

fn parse_symbols(var: &'static str, list: &str) -> Result<Vec<Symbol>, ConfigError> {
    let symbols = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Symbol>().map_err(|_| ConfigError::Symbol {
                var,
                value: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if symbols.is_empty() {
        return Err(ConfigError::NoSymbols { var });
    }
    Ok(symbols)
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
        _ => Err(ConfigError::Interval {
            var,
            value: value.to_string(),
        }),
    }
}
