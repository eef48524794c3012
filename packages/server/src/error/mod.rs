//! Centralized API error handling. User-facing strings are fixed (several
//! in Korean) to stay compatible with deployed clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use parlay_storage::hot::HotTierError;
use parlay_storage::lock::LockError;
use parlay_storage::queue::QueueError;
use parlay_storage::repository::RepositoryError;

/// Fixed user-facing strings.
pub mod messages {
    pub const PASSWORD_MISMATCH: &str = "비밀번호가 일치하지 않습니다.";
    pub const AUTH_ERROR: &str = "Authentication error";
    pub const TOKEN_EXPIRED: &str = "Token expired";
    pub const INVALID_TOKEN: &str = "Invalid token";
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const INVALID_SESSION: &str = "Invalid session";
    pub const LOCK_FAILED: &str = "Failed to acquire distributed lock";

    pub fn joined(name: &str) -> String {
        format!("{name}님이 입장하였습니다.")
    }

    pub fn left(name: &str) -> String {
        format!("{name}님이 퇴장하였습니다.")
    }

    pub fn disconnected(name: &str) -> String {
        format!("{name}님이 연결이 끊어졌습니다.")
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication error")]
    AuthRequired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid session")]
    InvalidSession,
    #[error("User not found")]
    UserNotFound,

    #[error("채팅방 참여자만 접근할 수 있습니다.")]
    NotParticipant,
    #[error("비밀번호가 일치하지 않습니다.")]
    PasswordMismatch,

    #[error("{0}")]
    Validation(String),
    #[error("Resource not found")]
    NotFound,
    #[error("Too many requests")]
    RateLimited,
    #[error("Failed to acquire distributed lock")]
    LockContention,
    #[error("Service is draining")]
    Draining,

    #[error("Internal server error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn internal<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Internal(Box::new(err))
    }

    fn parts(&self) -> (StatusCode, Option<&'static str>) {
        match self {
            ApiError::AuthRequired | ApiError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, Some("AUTH_FAILED"))
            },
            ApiError::TokenExpired => (StatusCode::UNAUTHORIZED, Some("TOKEN_EXPIRED")),
            ApiError::InvalidSession => (StatusCode::UNAUTHORIZED, Some("INVALID_SESSION")),
            ApiError::UserNotFound => (StatusCode::UNAUTHORIZED, Some("USER_NOT_FOUND")),
            ApiError::NotParticipant => (StatusCode::FORBIDDEN, Some("NOT_PARTICIPANT")),
            ApiError::PasswordMismatch => (StatusCode::UNAUTHORIZED, Some("INVALID_PASSWORD")),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, Some("INVALID_REQUEST")),
            ApiError::NotFound => (StatusCode::NOT_FOUND, Some("NOT_FOUND")),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, Some("RATE_LIMITED")),
            ApiError::LockContention => (StatusCode::SERVICE_UNAVAILABLE, Some("LOCK_CONTENTION")),
            ApiError::Draining => (StatusCode::SERVICE_UNAVAILABLE, Some("DRAINING")),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if let ApiError::Internal(source) = &self {
            tracing::error!(error = %source, "request failed");
        }
        let mut body = json!({
            "success": false,
            "message": self.to_string(),
        });
        if let (Some(code), serde_json::Value::Object(map)) = (code, &mut body) {
            map.insert("code".to_string(), json!(code));
        }
        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } => ApiError::NotFound,
            other => ApiError::internal(other),
        }
    }
}

impl From<HotTierError> for ApiError {
    fn from(err: HotTierError) -> Self {
        match err {
            HotTierError::NotFound(_) => ApiError::NotFound,
            HotTierError::LockContention(_) => ApiError::LockContention,
            other => ApiError::internal(other),
        }
    }
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contention { .. } => ApiError::LockContention,
            LockError::HotTier(inner) => inner.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_mismatch_keeps_the_korean_text() {
        assert_eq!(ApiError::PasswordMismatch.to_string(), messages::PASSWORD_MISMATCH);
        let (status, code) = ApiError::PasswordMismatch.parts();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, Some("INVALID_PASSWORD"));
    }

    #[test]
    fn system_messages_interpolate_names() {
        assert_eq!(messages::joined("영희"), "영희님이 입장하였습니다.");
        assert_eq!(messages::left("영희"), "영희님이 퇴장하였습니다.");
        assert_eq!(messages::disconnected("영희"), "영희님이 연결이 끊어졌습니다.");
    }

    #[test]
    fn lock_contention_maps_to_service_unavailable() {
        let err: ApiError =
            LockError::Contention { resource: "room_message_create:r1".into() }.into();
        assert_eq!(err.parts().0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), messages::LOCK_FAILED);
    }
}
