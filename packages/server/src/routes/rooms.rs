use axum::Extension;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use parlay_entity::DataSource;

use crate::auth::AuthenticatedUser;
use crate::cache::RoomListQuery;
use crate::error::ApiError;
use crate::realtime::ServerEvent;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRoomBody {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomBody {
    #[serde(default)]
    pub password: Option<String>,
}

/// GET /api/rooms — paged listing with cache-source headers.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(mut query): Query<RoomListQuery>,
) -> Result<Response, ApiError> {
    query.user_id = Some(user.id.clone());
    let listing = state.room_cache.list_rooms(&query).await?;

    let mut headers = HeaderMap::new();
    let max_age = if listing.meta.source == DataSource::Redis { 30 } else { 10 };
    if let Ok(value) = format!("private, max-age={max_age}").parse() {
        headers.insert("Cache-Control", value);
    }
    if let Ok(value) = listing.meta.source.as_str().parse() {
        headers.insert("X-Cache-Source", value);
    }
    Ok((headers, Json(json!({ "success": true, "data": listing }))).into_response())
}

/// POST /api/rooms — create, then announce on the lobby channel.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateRoomBody>,
) -> Result<Response, ApiError> {
    let view = state
        .room_cache
        .create_room(&body.name, user.summary(), body.password)
        .await?;
    state.hub.emit_to_all(ServerEvent::RoomCreated { room: view.clone() }).await;
    Ok(Json(json!({ "success": true, "data": view })).into_response())
}

/// GET /api/rooms/{room_id}
pub async fn get_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Response, ApiError> {
    let room = state.room_cache.get_room(&room_id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "success": true, "data": room.view(Some(&user.id)) })).into_response())
}

/// POST /api/rooms/{room_id}/join — password gate then membership.
pub async fn join_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
    Json(body): Json<JoinRoomBody>,
) -> Result<Response, ApiError> {
    let view = state
        .room_cache
        .join_room(&room_id, user.summary(), body.password.as_deref())
        .await?;
    state
        .hub
        .emit_to_room(&room_id, ServerEvent::RoomUpdate { room: view.clone() }, None)
        .await;
    state.hub.evict_participants(&room_id).await;
    // Peers re-read the room on their next access.
    state
        .bus
        .broadcast_cache_invalidation(&[crate::cache::room_key(&room_id)])
        .await;
    Ok(Json(json!({ "success": true, "data": view })).into_response())
}

/// DELETE /api/rooms/{room_id} — creator only; messages are retained.
pub async fn delete_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Response, ApiError> {
    state.room_cache.delete_room(&room_id, &user.id).await?;
    state
        .bus
        .broadcast_cache_invalidation(&[crate::cache::room_key(&room_id)])
        .await;
    Ok(Json(json!({ "success": true })).into_response())
}
