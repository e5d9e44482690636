use axum::Router;

pub mod admin;
pub mod health;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .merge(ws::router())
        .merge(admin::router())
        .merge(health::router())
}
