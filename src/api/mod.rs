pub mod error;
pub mod handlers;
pub mod state;

use std::future::Future;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{any, get};
use tower_http::cors::{Any, CorsLayer};

use crate::service::OiService;
use state::AppState;

pub fn router(service: OiService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health::health))
        .route("/api/latest", get(handlers::snapshots::latest))
        .route("/api/history", get(handlers::snapshots::history))
        // GET as well as POST so external pingers can trigger it.
        .route("/api/refresh", any(handlers::snapshots::refresh))
        .layer(cors)
        .with_state(AppState::new(service))
}

pub async fn serve(
    host: &str,
    port: u16,
    service: OiService,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(service);

    let addr = format!("{host}:{port}");
    println!("oi-tracker API listening on {addr}");
    println!("  Health:  GET      http://{addr}/api/health");
    println!("  Latest:  GET      http://{addr}/api/latest?symbol=NIFTY");
    println!("  History: GET      http://{addr}/api/history?symbol=NIFTY&limit=50");
    println!("  Refresh: GET|POST http://{addr}/api/refresh?symbol=NIFTY");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("running server")?;

    Ok(())
}
