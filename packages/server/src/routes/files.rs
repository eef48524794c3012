use axum::Extension;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::files::validate_upload;
use crate::state::AppState;

/// Accepted divergence between the announced and stored object size.
const SIZE_TOLERANCE_BYTES: u64 = 1024;

#[derive(Debug, Deserialize)]
pub struct PresignBody {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct UploadCompleteBody {
    #[serde(rename = "s3Key")]
    pub s3_key: String,
    pub filename: String,
    pub originalname: String,
    pub mimetype: String,
    pub size: u64,
}

/// POST /api/files/presigned-url — registry validation, then the external
/// store mints the upload URL.
pub async fn presigned_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<PresignBody>,
) -> Result<Response, ApiError> {
    validate_upload(&body.filename, &body.mimetype, body.size)?;
    let upload = state.object_store.presign_upload(&body.filename, &body.mimetype).await?;
    state.active_uploads.register(&upload.key, &user.id, &body.filename).await;
    Ok(Json(json!({ "success": true, "data": upload })).into_response())
}

/// POST /api/files/upload-complete — verifies the object landed with the
/// announced size (±1 KB) and MIME type, and returns the file descriptor.
pub async fn upload_complete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<UploadCompleteBody>,
) -> Result<Response, ApiError> {
    let spec = validate_upload(&body.filename, &body.mimetype, body.size)?;
    // Advisory only: the handshake may have been issued by a peer instance,
    // so the object check below stays authoritative.
    if !state.active_uploads.complete(&body.s3_key, &user.id).await {
        tracing::debug!(key = %body.s3_key, "upload completion without a local handshake");
    }
    let stored = state
        .object_store
        .head_object(&body.s3_key)
        .await?
        .ok_or_else(|| ApiError::Validation("업로드된 파일을 찾을 수 없습니다.".to_string()))?;

    if stored.size.abs_diff(body.size) > SIZE_TOLERANCE_BYTES {
        return Err(ApiError::Validation("파일 크기가 일치하지 않습니다.".to_string()));
    }
    if stored.mimetype != body.mimetype {
        return Err(ApiError::Validation("파일 형식이 일치하지 않습니다.".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "data": {
            "filename": body.filename,
            "originalname": body.originalname,
            "mimetype": body.mimetype,
            "size": stored.size,
            "s3Url": stored.url,
            "s3Key": body.s3_key,
            "s3Bucket": state.object_store.bucket(),
            "uploadedAt": Utc::now().timestamp_millis(),
            "category": spec.category,
            "subtype": spec.subtype,
        }
    }))
    .into_response())
}

/// GET /api/files/s3-url/download/{filename} — participation-gated
/// presigned download URL.
pub async fn download_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let (message, file) = owning_attachment(&state, &filename).await?;
    authorize_participant(&state, &message.room, &user.id).await?;
    let url = state.object_store.presign_download(&file.s3_key).await?;
    Ok(Json(json!({ "success": true, "data": { "url": url } })).into_response())
}

/// GET /api/files/s3-url/view/{filename} — returns the stored URL for
/// inline viewing.
pub async fn view_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let (message, file) = owning_attachment(&state, &filename).await?;
    authorize_participant(&state, &message.room, &user.id).await?;
    Ok(Json(json!({ "success": true, "data": { "url": file.s3_url } })).into_response())
}

async fn owning_attachment(
    state: &AppState,
    filename: &str,
) -> Result<(parlay_entity::Message, parlay_entity::FileAttachment), ApiError> {
    let message = state
        .messages_repo
        .find_by_file_name(filename)
        .await?
        .ok_or(ApiError::NotFound)?;
    let file = message.kind.file().cloned().ok_or(ApiError::NotFound)?;
    Ok((message, file))
}

async fn authorize_participant(
    state: &AppState,
    room_id: &str,
    user_id: &str,
) -> Result<(), ApiError> {
    let room = state.room_cache.get_room(room_id).await?.ok_or(ApiError::NotFound)?;
    if !room.is_participant(user_id) {
        return Err(ApiError::NotParticipant);
    }
    Ok(())
}
