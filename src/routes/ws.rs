use axum::{
    Router, routing::get,
    extract::{ws::WebSocketUpgrade, Query, Extension},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
    config::{DEFAULT_ROOM, DEFAULT_USER},
    error::{AppErr, AppResult},
    session,
    state::AppState,
};

#[derive(Deserialize)]
struct ConnectQuery { room: Option<String>, user: Option<String> }

pub fn router() -> Router {
    Router::new()
        .route("/connect", get(ws_handler))
        .route("/ws",      get(ws_handler))
}

fn or_default(v: Option<String>, default: &str) -> String {
    v.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.into())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(q): Query<ConnectQuery>,
    Extension(state): Extension<AppState>,
) -> AppResult<impl IntoResponse> {
    /* degraded: only admit new members if the store answers again */
    if state.health.is_degraded() {
        let ping = state.store.ping().await;
        state.health.observe(&ping);
        if let Err(e) = ping {
            warn!(error = %e, "rejecting join, store unavailable");
            return Err(AppErr::Unavailable("store unavailable".into()));
        }
    }

    let room = or_default(q.room, DEFAULT_ROOM);
    let user = or_default(q.user, DEFAULT_USER);
    Ok(ws.on_upgrade(move |s| session::run(s, state, room, user)))
}
