use chrono::Utc;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use crate::repository::error::RepositoryError;

/// Session records written by the external auth service; the core only
/// checks and touches them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "lastActive", skip_serializing_if = "Option::is_none")]
    pub last_active: Option<i64>,
}

#[derive(Clone)]
pub struct SessionRepository {
    collection: Collection<SessionRecord>,
}

impl SessionRepository {
    pub fn new(db: Database) -> Self {
        Self { collection: db.collection("sessions") }
    }

    /// Whether `(user, session)` is the currently registered session.
    pub async fn is_valid(&self, user_id: &str, session_id: &str) -> Result<bool, RepositoryError> {
        let found = self
            .collection
            .find_one(doc! { "userId": user_id, "sessionId": session_id })
            .await?;
        Ok(found.is_some())
    }

    pub async fn touch(&self, user_id: &str, session_id: &str) -> Result<(), RepositoryError> {
        self.collection
            .update_one(
                doc! { "userId": user_id, "sessionId": session_id },
                doc! { "$set": { "lastActive": Utc::now().timestamp_millis() } },
            )
            .await?;
        Ok(())
    }
}
