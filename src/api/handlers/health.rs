use axum::Json;
use axum::extract::State;

use crate::api::state::AppState;
use crate::service::Health;

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.service.health().await)
}
