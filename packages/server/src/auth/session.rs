use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use parlay_storage::repository::{SessionRepository, UserRepository};

use crate::auth::middleware::AuthenticatedUser;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: String,
    #[allow(dead_code)]
    exp: i64,
    #[serde(default)]
    #[allow(dead_code)]
    iat: i64,
}

/// Validates `{token, sessionId}` pairs: HS256 JWT against `JWT_SECRET`,
/// then the session registration in the durable tier, then the user record.
/// Token issuance and registration belong to the external auth service.
#[derive(Clone)]
pub struct SessionService {
    decoding_key: DecodingKey,
    users: UserRepository,
    sessions: SessionRepository,
}

impl SessionService {
    pub fn new(jwt_secret: &str, users: UserRepository, sessions: SessionRepository) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            users,
            sessions,
        }
    }

    /// Decodes the token and returns the subject user id.
    pub fn verify_token(&self, token: &str) -> Result<String, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims.sub),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => Err(ApiError::TokenExpired),
                _ => Err(ApiError::InvalidToken),
            },
        }
    }

    /// Full handshake validation used by both HTTP middleware and the
    /// realtime hub.
    pub async fn authenticate(
        &self,
        token: &str,
        session_id: &str,
    ) -> Result<AuthenticatedUser, ApiError> {
        let user_id = self.verify_token(token)?;
        let valid = self
            .sessions
            .is_valid(&user_id, session_id)
            .await
            .map_err(ApiError::internal)?;
        if !valid {
            debug!(user_id = %user_id, "session id did not match the registered session");
            return Err(ApiError::InvalidSession);
        }
        let user = self
            .users
            .get_by_id(&user_id)
            .await
            .map_err(ApiError::internal)?
            .ok_or(ApiError::UserNotFound)?;
        let _ = self.sessions.touch(&user_id, session_id).await;
        Ok(AuthenticatedUser {
            id: user.id,
            name: user.name,
            email: user.email,
            profile_image: user.profile_image,
            session_id: session_id.to_string(),
        })
    }

    /// Re-check that a session is still the registered one, without the
    /// full user lookup.
    pub async fn is_session_valid(&self, user_id: &str, session_id: &str) -> bool {
        self.sessions.is_valid(user_id, session_id).await.unwrap_or(false)
    }

    /// `force_login` check: the supplied token must belong to the user.
    pub fn token_belongs_to(&self, token: &str, user_id: &str) -> bool {
        self.verify_token(token).map(|sub| sub == user_id).unwrap_or(false)
    }
}
