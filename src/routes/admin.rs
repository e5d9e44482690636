//! Operator endpoints. Unknown rooms are not errors: listing and destroying
//! are idempotent.

use axum::{
    Router, routing::get,
    extract::{Extension, Json, Query},
};
use serde::Deserialize;

use crate::{
    admin::RoomStatus,
    error::{AppErr, AppResult},
    state::AppState,
};

#[derive(Deserialize)]
struct RoomQuery { room: Option<String> }

impl RoomQuery {
    fn required(self) -> AppResult<String> {
        self.room
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppErr::Bad("missing room".into()))
    }
}

pub fn router() -> Router {
    Router::new()
        .route("/rooms",         get(list_rooms))
        .route("/destroy",       get(destroy_room))
        .route("/room",          get(room_status))
        .route("/admin/rooms",   get(list_rooms))
        .route("/admin/destroy", get(destroy_room))
}

async fn list_rooms(Extension(state): Extension<AppState>) -> AppResult<Json<Vec<String>>> {
    let rooms = state.admin.list_rooms().await;
    state.health.observe(&rooms);
    Ok(Json(rooms?))
}

async fn destroy_room(
    Extension(state): Extension<AppState>,
    Query(q): Query<RoomQuery>,
) -> AppResult<&'static str> {
    let room = q.required()?;
    match state.admin.destroy_room(&room).await {
        Ok(()) => {
            state.health.mark_ok();
            Ok("Destroyed")
        }
        Err(AppErr::Store(e)) => {
            state.health.mark_failed(&e);
            Err(AppErr::Store(e))
        }
        Err(e) => Err(e),
    }
}

async fn room_status(
    Extension(state): Extension<AppState>,
    Query(q): Query<RoomQuery>,
) -> AppResult<Json<RoomStatus>> {
    let room = q.required()?;
    let status = state.admin.room_state(&room).await;
    state.health.observe(&status);
    Ok(Json(status?))
}
