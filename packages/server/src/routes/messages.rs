use axum::Extension;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::cache::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessagePageQuery {
    #[serde(default)]
    pub before: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/rooms/{room_id}/messages — participation check, paged history,
/// fire-and-forget auto-read of the returned page.
pub async fn get_room_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
    Query(query): Query<MessagePageQuery>,
) -> Result<Response, ApiError> {
    let room = state.room_cache.get_room(&room_id).await?.ok_or(ApiError::NotFound)?;
    if !room.is_participant(&user.id) {
        return Err(ApiError::NotParticipant);
    }

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let batch = state
        .message_cache
        .get_messages_by_room(&room_id, query.before, limit)
        .await?;

    // Receipts converge asynchronously; the response never waits on them.
    let ids: Vec<String> = batch.messages.iter().map(|m| m.id.clone()).collect();
    if !ids.is_empty() {
        let cache = state.message_cache.clone();
        let reader = user.id.clone();
        tokio::spawn(async move {
            let _ = cache.mark_as_read(&ids, &reader).await;
        });
    }

    let mut headers = HeaderMap::new();
    if let Ok(value) = batch.source.as_str().parse() {
        headers.insert("X-Cache-Source", value);
    }
    Ok((headers, Json(json!({ "success": true, "data": batch }))).into_response())
}
