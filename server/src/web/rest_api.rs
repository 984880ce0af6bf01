use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::engine::events::OnlineUser;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rooms: usize,
    pub online: usize,
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: state.engine.discoverable_rooms().len(),
        online: state.engine.online_users().len(),
    })
}

/// GET /api/rooms: public and protected rooms.
pub async fn list_rooms(State(state): State<Arc<AppState>>, _auth: AuthUser) -> impl IntoResponse {
    Json(state.engine.discoverable_rooms())
}

/// GET /api/rooms/{name}: a single room the caller is allowed to see.
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.engine.get_room(&name) {
        Ok(room) if room.is_visible_to(actor.user_id) => Json(room).into_response(),
        _ => (StatusCode::NOT_FOUND, "Room not found").into_response(),
    }
}

/// GET /api/users/online
pub async fn online_users(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<Vec<OnlineUser>> {
    Json(state.engine.online_users())
}
