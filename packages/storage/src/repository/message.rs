use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::{Collection, Database};

use parlay_entity::Message;

use crate::repository::error::RepositoryError;

/// One durable-tier history page, oldest-first.
#[derive(Debug, Clone)]
pub struct RoomPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct MessageRepository {
    collection: Collection<Message>,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { collection: db.collection("messages") }
    }

    /// Idempotent create: replace-by-id with upsert, so replaying a
    /// CREATE_MESSAGE event is a no-op.
    pub async fn upsert(&self, message: &Message) -> Result<(), RepositoryError> {
        self.collection
            .replace_one(doc! { "_id": &message.id }, message)
            .upsert(true)
            .await?;
        Ok(())
    }

    /// `$set` of arbitrary top-level fields, the UPDATE_MESSAGE shape.
    pub async fn set_fields(
        &self,
        message_id: &str,
        fields: Document,
    ) -> Result<bool, RepositoryError> {
        let result = self
            .collection
            .update_one(doc! { "_id": message_id }, doc! { "$set": fields })
            .await?;
        Ok(result.matched_count > 0)
    }

    /// Conditional push: only adds the receipt when no entry for the user
    /// exists, so replays converge.
    pub async fn mark_as_read(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: i64,
    ) -> Result<bool, RepositoryError> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": message_id, "readers.userId": { "$ne": user_id } },
                doc! {
                    "$push": { "readers": { "userId": user_id, "readAt": read_at } },
                    "$set": { "updatedAt": read_at },
                },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    pub async fn add_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
        at: i64,
    ) -> Result<(), RepositoryError> {
        let field = format!("reactions.{emoji}");
        self.collection
            .update_one(
                doc! { "_id": message_id },
                doc! { "$addToSet": { &field: user_id }, "$set": { "updatedAt": at } },
            )
            .await?;
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
        at: i64,
    ) -> Result<(), RepositoryError> {
        let field = format!("reactions.{emoji}");
        self.collection
            .update_one(
                doc! { "_id": message_id },
                doc! { "$pull": { &field: user_id }, "$set": { "updatedAt": at } },
            )
            .await?;
        // Drop the bucket once its user set empties.
        self.collection
            .update_one(
                doc! { "_id": message_id, &field: { "$size": 0 } },
                doc! { "$unset": { &field: "" } },
            )
            .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, message_id: &str, at: i64) -> Result<bool, RepositoryError> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": message_id },
                doc! { "$set": { "isDeleted": true, "deletedAt": at, "updatedAt": at } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    pub async fn get_by_id(&self, message_id: &str) -> Result<Option<Message>, RepositoryError> {
        Ok(self.collection.find_one(doc! { "_id": message_id }).await?)
    }

    /// History page before `before` (exclusive), newest-first fetch reversed
    /// to oldest-first; fetches one extra row to derive `has_more`.
    pub async fn page(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<RoomPage, RepositoryError> {
        let mut filter = doc! { "room": room_id, "isDeleted": false };
        if let Some(before) = before {
            filter.insert("timestamp", doc! { "$lt": before });
        }
        let cursor = self
            .collection
            .find(filter)
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .limit(limit as i64 + 1)
            .await?;
        let mut messages: Vec<Message> = cursor.try_collect().await?;
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        messages.reverse();
        Ok(RoomPage { messages, has_more })
    }

    pub async fn recent_for_room(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let cursor = self
            .collection
            .find(doc! { "room": room_id, "isDeleted": false })
            .sort(doc! { "timestamp": -1 })
            .limit(limit as i64)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Rooms with any message since `since_ms`, for startup cache warming.
    pub async fn active_room_ids(&self, since_ms: i64) -> Result<Vec<String>, RepositoryError> {
        let values = self
            .collection
            .distinct("room", doc! { "timestamp": { "$gte": since_ms } })
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|value| match value {
                Bson::String(room_id) => Some(room_id),
                _ => None,
            })
            .collect())
    }

    /// Messages originating from other instances since `since_ms`; the
    /// replication initial-sync set.
    pub async fn foreign_since(
        &self,
        instance_id: &str,
        since_ms: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let cursor = self
            .collection
            .find(doc! {
                "instanceId": { "$ne": instance_id },
                "timestamp": { "$gte": since_ms },
            })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Owning message for a stored attachment, for download authorization.
    pub async fn find_by_file_name(
        &self,
        filename: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        Ok(self.collection.find_one(doc! { "file.filename": filename }).await?)
    }

    pub fn collection(&self) -> &Collection<Message> {
        &self.collection
    }
}
