use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::model::{PersistedRecord, Symbol};

#[derive(Debug, Default, Deserialize)]
pub struct SymbolQuery {
    pub symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub symbol: Option<String>,
    pub limit: Option<String>,
}

fn parse_symbol(raw: &str) -> Result<Symbol, ApiError> {
    raw.parse().map_err(|e| ApiError::BadRequest(format!("{e}")))
}

fn require_symbol(raw: Option<&str>) -> Result<Symbol, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_symbol(s),
        None => Err(ApiError::BadRequest("Symbol required".into())),
    }
}

/// `None`, `all`, `0` and anything unparseable mean no limit.
pub fn parse_limit(raw: Option<&str>) -> Option<usize> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") | Some("0") => None,
        Some(s) => s.parse::<usize>().ok().filter(|n| *n > 0),
    }
}

pub async fn latest(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<Option<PersistedRecord>>, ApiError> {
    let symbol = require_symbol(query.symbol.as_deref())?;
    Ok(Json(state.service.latest(symbol).await?))
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PersistedRecord>>, ApiError> {
    let symbol = require_symbol(query.symbol.as_deref())?;
    let limit = parse_limit(query.limit.as_deref());
    Ok(Json(state.service.history(symbol, limit).await?))
}

/// Symbol from a JSON body, then the query string, then NIFTY.
pub async fn refresh(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let from_body = serde_json::from_slice::<SymbolQuery>(&body)
        .ok()
        .and_then(|b| b.symbol);
    let symbol = match from_body
        .or(query.symbol)
        .filter(|s| !s.trim().is_empty())
    {
        Some(raw) => parse_symbol(raw.trim())?,
        None => Symbol::Nifty,
    };

    info!(%symbol, "manual refresh requested");
    match state.service.refresh(symbol).await? {
        Some(outcome) => Ok(Json(json!({ "msg": "Refreshed", "data": outcome.to_json() }))),
        None => Err(ApiError::Internal(format!(
            "Error refreshing: no data obtained for {symbol}"
        ))),
    }
}
