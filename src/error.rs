use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Config: {0}")]
    Config(String),

    #[error("Store: {0}")]
    Store(#[from] StoreError),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, body) = match self {
            AppErr::Bad(msg)         => (StatusCode::BAD_REQUEST, msg),
            AppErr::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            other                    => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (code, body).into_response()
    }
}

/* ── helpers: wrap any displayable error ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }

pub fn config<E: Display>(key: &str, e: E) -> AppErr {
    AppErr::Config(format!("{key}: {e}"))
}
