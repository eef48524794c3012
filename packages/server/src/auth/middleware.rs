use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Identity attached to authenticated requests and realtime sessions.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "profileImage", skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(skip)]
    pub session_id: String,
}

impl AuthenticatedUser {
    pub fn summary(&self) -> parlay_entity::UserSummary {
        parlay_entity::UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            profile_image: self.profile_image.clone(),
        }
    }
}

/// Requires `x-auth-token` and `x-session-id` headers; on success the
/// `AuthenticatedUser` is inserted as a request extension.
pub async fn require_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = header(&request, "x-auth-token").ok_or(ApiError::AuthRequired)?;
    let session_id = header(&request, "x-session-id").ok_or(ApiError::AuthRequired)?;
    let user = state.session_service.authenticate(&token, &session_id).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
