//! Write-back message cache: messages land in the hot tier first, reach the
//! durable tier asynchronously through the sync queue, and fan out to peers
//! over the cross-instance bus.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parlay_entity::{
    DataSource, Message, MessageKind, SyncOperation, UserSummary, new_object_id,
};
use parlay_storage::hot::{HotTier, SearchOptions};
use parlay_storage::lock::LockService;
use parlay_storage::queue::SyncQueue;
use parlay_storage::repository::MessageRepository;

use crate::cache::{MESSAGE_INDEX, message_key};
use crate::cluster::BusCommand;
use crate::error::ApiError;

pub const DEFAULT_PAGE_LIMIT: usize = 30;
pub const MAX_PAGE_LIMIT: usize = 100;

const CREATE_LOCK_TTL: Duration = Duration::from_secs(5);
const CREATE_LOCK_RETRIES: u32 = 30;
const WARM_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Input for a message create; ids and timestamps are assigned here.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: String,
    pub sender: UserSummary,
    pub kind: MessageKind,
    pub content: String,
    pub mentions: Vec<String>,
}

/// One history page, oldest→newest.
#[derive(Debug, Clone, Serialize)]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "oldestTimestamp", skip_serializing_if = "Option::is_none")]
    pub oldest_timestamp: Option<i64>,
    pub source: DataSource,
}

impl MessageBatch {
    fn empty(source: DataSource) -> Self {
        Self { messages: Vec::new(), has_more: false, oldest_timestamp: None, source }
    }
}

/// Result of a reaction mutation, carrying what the hub fans out.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionUpdate {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub room: String,
    pub emoji: String,
    /// Users currently reacting with this emoji.
    pub users: Vec<String>,
    /// Full reaction map after the mutation.
    pub reactions: std::collections::BTreeMap<String, Vec<String>>,
}

pub struct MessageCacheService {
    hot: Arc<HotTier>,
    messages: MessageRepository,
    queue: Arc<SyncQueue>,
    locks: Arc<LockService>,
    bus_tx: mpsc::UnboundedSender<BusCommand>,
    instance_id: String,
}

impl MessageCacheService {
    pub fn new(
        hot: Arc<HotTier>,
        messages: MessageRepository,
        queue: Arc<SyncQueue>,
        locks: Arc<LockService>,
        bus_tx: mpsc::UnboundedSender<BusCommand>,
        instance_id: String,
    ) -> Self {
        Self { hot, messages, queue, locks, bus_tx, instance_id }
    }

    /// Paged history for a room. Hot-tier index first; zero matches or an
    /// error fall back to the durable tier, caching what was fetched.
    pub async fn get_messages_by_room(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<MessageBatch, ApiError> {
        if limit == 0 {
            return Ok(MessageBatch::empty(DataSource::Redis));
        }
        let limit = limit.min(MAX_PAGE_LIMIT);

        match self.page_from_hot(room_id, before, limit).await {
            Ok(Some(batch)) => return Ok(batch),
            Ok(None) => debug!(room_id, "message index empty, reading the durable tier"),
            Err(err) => {
                warn!(room_id, error = %err, "message page fell back to the durable tier");
            },
        }

        self.page_from_durable(room_id, before, limit).await
    }

    async fn page_from_hot(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Option<MessageBatch>, ApiError> {
        let expression = build_message_search(room_id, before);
        let options = SearchOptions {
            sort_by: Some("timestamp".to_string()),
            descending: true,
            offset: 0,
            limit: limit as u64,
        };
        let result = self.hot.search(MESSAGE_INDEX, &expression, &options).await?;
        if result.keys.is_empty() {
            return Ok(None);
        }

        let mut messages = Vec::with_capacity(result.keys.len());
        for key in &result.keys {
            let Some(doc) = self.hot.json_get(key, "$").await? else { continue };
            match serde_json::from_value::<Message>(doc) {
                Ok(message) => messages.push(message),
                Err(err) => warn!(key = %key, error = %err, "undecodable cached message skipped"),
            }
        }

        let matched = messages.len();
        // The index answers newest-first; pages read oldest→newest.
        messages.reverse();
        Ok(Some(MessageBatch {
            has_more: matched >= limit,
            oldest_timestamp: messages.first().map(|m| m.timestamp),
            messages,
            source: DataSource::Redis,
        }))
    }

    async fn page_from_durable(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<MessageBatch, ApiError> {
        let page = self.messages.page(room_id, before, limit).await?;
        for message in &page.messages {
            self.cache_message(message).await;
        }
        Ok(MessageBatch {
            has_more: page.has_more,
            oldest_timestamp: page.messages.first().map(|m| m.timestamp),
            messages: page.messages,
            source: DataSource::Mongodb,
        })
    }

    /// Write-back create under the per-room lock: hot-tier write, queue
    /// enqueue, cross-instance broadcast. The lock serializes timestamp
    /// assignment within the room on this instance.
    pub async fn create_message(&self, input: NewMessage) -> Result<Message, ApiError> {
        let resource = format!("room_message_create:{}", input.room);
        self.locks.acquire(&resource, CREATE_LOCK_TTL, CREATE_LOCK_RETRIES).await?;
        let result = self.create_locked(input).await;
        if let Err(err) = self.locks.release(&resource).await {
            warn!(resource = %resource, error = %err, "failed to release create lock");
        }
        result
    }

    async fn create_locked(&self, input: NewMessage) -> Result<Message, ApiError> {
        let mut message = Message::new(
            new_object_id(),
            input.room,
            input.sender,
            input.kind,
            input.content,
            input.mentions,
            Utc::now().timestamp_millis(),
        );
        message.instance_id = Some(self.instance_id.clone());

        let doc = serde_json::to_value(&message).map_err(ApiError::internal)?;
        self.hot.json_set(&message_key(&message.id), "$", &doc).await?;
        self.queue.enqueue(SyncOperation::CreateMessage, &doc).await?;
        self.broadcast(SyncOperation::CreateMessage, doc);

        debug!(
            message_id = %message.id,
            room = %message.room,
            kind = message.kind.type_name(),
            "message created"
        );
        Ok(message)
    }

    /// Marks messages read for a user; returns the subset that actually
    /// changed.
    pub async fn mark_as_read(
        &self,
        message_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<String>, ApiError> {
        let read_at = Utc::now().timestamp_millis();
        let mut updated = Vec::new();
        for message_id in message_ids {
            let Some(mut message) = self.load_message(message_id).await? else {
                continue;
            };
            if !message.add_reader(user_id, read_at) {
                continue;
            }
            message.updated_at = Some(read_at);
            self.cache_message(&message).await;
            let payload = json!({
                "messageId": message_id,
                "userId": user_id,
                "readAt": read_at,
            });
            self.queue.enqueue(SyncOperation::MarkAsRead, &payload).await?;
            self.broadcast_update(&message);
            updated.push(message_id.clone());
        }
        Ok(updated)
    }

    pub async fn add_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<ReactionUpdate, ApiError> {
        self.mutate_reaction(message_id, emoji, user_id, SyncOperation::AddReaction).await
    }

    pub async fn remove_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<ReactionUpdate, ApiError> {
        self.mutate_reaction(message_id, emoji, user_id, SyncOperation::RemoveReaction).await
    }

    async fn mutate_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
        operation: SyncOperation,
    ) -> Result<ReactionUpdate, ApiError> {
        let mut message = self.load_message(message_id).await?.ok_or(ApiError::NotFound)?;
        let at = Utc::now().timestamp_millis();
        let users = match operation {
            SyncOperation::AddReaction => message.add_reaction(emoji, user_id),
            _ => message.remove_reaction(emoji, user_id),
        };
        message.updated_at = Some(at);
        self.cache_message(&message).await;

        let payload = json!({
            "messageId": message_id,
            "emoji": emoji,
            "userId": user_id,
            "at": at,
        });
        self.queue.enqueue(operation, &payload).await?;
        self.broadcast_update(&message);

        Ok(ReactionUpdate {
            message_id: message_id.to_string(),
            room: message.room.clone(),
            emoji: emoji.to_string(),
            users,
            reactions: message.reactions.clone(),
        })
    }

    /// Persists a message straight to both tiers, bypassing the queue. Used
    /// for finished AI responses, which are born complete.
    pub async fn persist_direct(&self, message: &Message) -> Result<(), ApiError> {
        self.messages.upsert(message).await?;
        self.cache_message(message).await;
        let doc = serde_json::to_value(message).map_err(ApiError::internal)?;
        self.broadcast(SyncOperation::CreateMessage, doc);
        Ok(())
    }

    /// Loads from the hot tier, falling back to the durable tier and
    /// re-caching on miss.
    async fn load_message(&self, message_id: &str) -> Result<Option<Message>, ApiError> {
        let key = message_key(message_id);
        match self.hot.json_get(&key, "$").await {
            Ok(Some(doc)) => {
                if let Ok(message) = serde_json::from_value::<Message>(doc) {
                    return Ok(Some(message));
                }
                warn!(message_id, "undecodable cached message, reloading");
            },
            Ok(None) => {},
            Err(err) => warn!(message_id, error = %err, "message read fell back to durable"),
        }
        let Some(message) = self.messages.get_by_id(message_id).await? else {
            return Ok(None);
        };
        self.cache_message(&message).await;
        Ok(Some(message))
    }

    /// Pre-populates the hot tier with the newest messages of a room.
    pub async fn warm_cache_for_room(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<usize, ApiError> {
        let recent = self.messages.recent_for_room(room_id, limit).await?;
        let mut cached = 0;
        for message in &recent {
            if self.try_cache_message(message).await {
                cached += 1;
            }
        }
        debug!(room_id, cached, "room message cache warmed");
        Ok(cached)
    }

    /// Warms every room with activity in the last 24 hours.
    pub async fn warm_all_active_rooms(&self) -> Result<usize, ApiError> {
        let since = Utc::now().timestamp_millis() - WARM_WINDOW_MS;
        let rooms = self.messages.active_room_ids(since).await?;
        let mut warmed = 0;
        for room_id in &rooms {
            match self.warm_cache_for_room(room_id, DEFAULT_PAGE_LIMIT).await {
                Ok(_) => warmed += 1,
                Err(err) => warn!(room_id = %room_id, error = %err, "room warm-up failed"),
            }
        }
        info!(rooms = rooms.len(), warmed, "active room caches warmed");
        Ok(warmed)
    }

    async fn cache_message(&self, message: &Message) {
        self.try_cache_message(message).await;
    }

    async fn try_cache_message(&self, message: &Message) -> bool {
        let doc = match serde_json::to_value(message) {
            Ok(doc) => doc,
            Err(_) => return false,
        };
        match self.hot.json_set(&message_key(&message.id), "$", &doc).await {
            Ok(()) => true,
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "failed to cache message");
                false
            },
        }
    }

    fn broadcast(&self, operation: SyncOperation, payload: Value) {
        if self.bus_tx.send(BusCommand::MessageSync { operation, payload }).is_err() {
            debug!("cross-instance bus not draining, broadcast dropped");
        }
    }

    fn broadcast_update(&self, message: &Message) {
        if let Ok(doc) = serde_json::to_value(message) {
            self.broadcast(SyncOperation::UpdateMessage, doc);
        }
    }
}

/// Search expression for a room's visible messages, newest-first, optionally
/// bounded to strictly-older-than `before` (both tiers agree on the
/// exclusive bound).
fn build_message_search(room_id: &str, before: Option<i64>) -> String {
    let mut expression = format!("@room:{{{room_id}}} @isDeleted:{{false}}");
    if let Some(before) = before {
        expression.push_str(&format!(" @timestamp:[0 ({before}]"));
    }
    expression
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_expression_filters_room_and_deleted() {
        assert_eq!(
            build_message_search("r1", None),
            "@room:{r1} @isDeleted:{false}"
        );
    }

    #[test]
    fn before_bound_is_exclusive() {
        assert_eq!(
            build_message_search("r1", Some(1_700_000_000_000)),
            "@room:{r1} @isDeleted:{false} @timestamp:[0 (1700000000000]"
        );
    }
}
