use axum::{Router, routing::get, extract::Extension, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router {
    Router::new().route("/healthz", get(health))
}

async fn health(Extension(state): Extension<AppState>) -> Json<Value> {
    let status = if state.health.is_degraded() { "degraded" } else { "healthy" };
    Json(json!({
        "status":   status,
        "rooms":    state.registry.rooms().await.len(),
        "sessions": state.registry.session_count().await,
    }))
}
