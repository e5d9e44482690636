//! Room broadcaster: clients join named rooms over WebSocket, every event is
//! persisted to a shared store and fanned out to all server processes through
//! one bus topic.

pub mod admin;
pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;

use std::path::Path;

use axum::{Extension, Router};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::state::AppState;

pub fn app(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .merge(routes::router())
        .fallback_service(ServeDir::new(static_dir))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
