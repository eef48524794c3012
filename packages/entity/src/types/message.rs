use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::user::UserSummary;

/// File descriptor attached to `type = "file"` messages. The object itself
/// lives in the external object store; the core only holds the handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    pub filename: String,
    pub originalname: String,
    pub mimetype: String,
    pub size: u64,
    #[serde(rename = "s3Url")]
    pub s3_url: String,
    #[serde(rename = "s3Key")]
    pub s3_key: String,
    #[serde(rename = "s3Bucket")]
    pub s3_bucket: String,
    /// Epoch milliseconds.
    #[serde(rename = "uploadedAt", skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<i64>,
}

/// Read receipt. Unique per user within a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reader {
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Epoch milliseconds.
    #[serde(rename = "readAt")]
    pub read_at: i64,
}

/// Message payload variants. The persisted and wire JSON stays flat
/// (`type` + optional `file` / `aiType` fields); the enum only exists on the
/// Rust side so file and AI data cannot appear on the wrong variant.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text,
    File(FileAttachment),
    System,
    Ai { ai_type: String },
}

impl MessageKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File(_) => "file",
            MessageKind::System => "system",
            MessageKind::Ai { .. } => "ai",
        }
    }

    pub fn file(&self) -> Option<&FileAttachment> {
        match self {
            MessageKind::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn ai_type(&self) -> Option<&str> {
        match self {
            MessageKind::Ai { ai_type } => Some(ai_type),
            _ => None,
        }
    }
}

/// A chat message. Owns its readers, reactions, metadata and file
/// descriptor. Soft-deleted messages keep their document but are excluded
/// from normal reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "MessageWire", try_from = "MessageWire")]
pub struct Message {
    pub id: String,
    pub room: String,
    pub sender: UserSummary,
    pub kind: MessageKind,
    pub content: String,
    /// AI handles referenced in the content, e.g. `wayneAI`.
    pub mentions: Vec<String>,
    /// Epoch milliseconds, server-assigned at creation.
    pub timestamp: i64,
    pub readers: Vec<Reader>,
    /// emoji -> reacting user ids, set semantics per bucket.
    pub reactions: BTreeMap<String, Vec<String>>,
    pub metadata: Map<String, Value>,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
    /// Originating instance, used by the replication filter.
    pub instance_id: Option<String>,
    /// Epoch milliseconds of the last mutation; LWW logical clock falls back
    /// to `timestamp` when absent.
    pub updated_at: Option<i64>,
    pub replicated_from: Option<String>,
    pub replicated_at: Option<i64>,
    pub last_modified_by: Option<String>,
    pub last_modified_at: Option<i64>,
}

impl Message {
    pub fn new(
        id: String,
        room: String,
        sender: UserSummary,
        kind: MessageKind,
        content: String,
        mentions: Vec<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            room,
            sender,
            kind,
            content,
            mentions,
            timestamp,
            readers: Vec::new(),
            reactions: BTreeMap::new(),
            metadata: Map::new(),
            is_deleted: false,
            deleted_at: None,
            instance_id: None,
            updated_at: None,
            replicated_from: None,
            replicated_at: None,
            last_modified_by: None,
            last_modified_at: None,
        }
    }

    /// Adds a read receipt unless the user already has one. Returns whether
    /// the set changed.
    pub fn add_reader(&mut self, user_id: &str, read_at: i64) -> bool {
        if self.readers.iter().any(|r| r.user_id == user_id) {
            return false;
        }
        self.readers.push(Reader { user_id: user_id.to_string(), read_at });
        true
    }

    /// Adds the user to the emoji bucket (set semantics) and returns the
    /// resulting user set for that emoji.
    pub fn add_reaction(&mut self, emoji: &str, user_id: &str) -> Vec<String> {
        let bucket = self.reactions.entry(emoji.to_string()).or_default();
        if !bucket.iter().any(|u| u == user_id) {
            bucket.push(user_id.to_string());
        }
        bucket.clone()
    }

    /// Removes the user from the emoji bucket, dropping the bucket when it
    /// empties. Returns the remaining user set for that emoji.
    pub fn remove_reaction(&mut self, emoji: &str, user_id: &str) -> Vec<String> {
        let remaining = match self.reactions.get_mut(emoji) {
            Some(bucket) => {
                bucket.retain(|u| u != user_id);
                bucket.clone()
            },
            None => return Vec::new(),
        };
        if remaining.is_empty() {
            self.reactions.remove(emoji);
        }
        remaining
    }

    pub fn mark_deleted(&mut self, at: i64) {
        self.is_deleted = true;
        self.deleted_at = Some(at);
        self.updated_at = Some(at);
    }

    /// Logical clock for last-write-wins conflict resolution.
    pub fn logical_clock(&self) -> i64 {
        self.updated_at.unwrap_or(self.timestamp)
    }
}

/// Generates an opaque 24-hex document id.
pub fn new_object_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum MessageParseError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("file message without file descriptor")]
    MissingFile,
    #[error("ai message without aiType")]
    MissingAiType,
}

/// Flat wire/persisted shape shared by the hot tier, the durable tier and
/// the realtime protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageWire {
    #[serde(rename = "_id")]
    id: String,
    room: String,
    sender: UserSummary,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<FileAttachment>,
    #[serde(rename = "aiType", default, skip_serializing_if = "Option::is_none")]
    ai_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mentions: Vec<String>,
    timestamp: i64,
    #[serde(default)]
    readers: Vec<Reader>,
    #[serde(default)]
    reactions: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    #[serde(rename = "isDeleted", default)]
    is_deleted: bool,
    #[serde(rename = "deletedAt", default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<i64>,
    #[serde(rename = "instanceId", default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<i64>,
    #[serde(rename = "replicatedFrom", default, skip_serializing_if = "Option::is_none")]
    replicated_from: Option<String>,
    #[serde(rename = "replicatedAt", default, skip_serializing_if = "Option::is_none")]
    replicated_at: Option<i64>,
    #[serde(rename = "lastModifiedBy", default, skip_serializing_if = "Option::is_none")]
    last_modified_by: Option<String>,
    #[serde(rename = "lastModifiedAt", default, skip_serializing_if = "Option::is_none")]
    last_modified_at: Option<i64>,
}

impl From<Message> for MessageWire {
    fn from(message: Message) -> Self {
        let message_type = message.kind.type_name().to_string();
        let (file, ai_type) = match message.kind {
            MessageKind::File(file) => (Some(file), None),
            MessageKind::Ai { ai_type } => (None, Some(ai_type)),
            MessageKind::Text | MessageKind::System => (None, None),
        };
        Self {
            id: message.id,
            room: message.room,
            sender: message.sender,
            message_type,
            content: message.content,
            file,
            ai_type,
            mentions: message.mentions,
            timestamp: message.timestamp,
            readers: message.readers,
            reactions: message.reactions,
            metadata: message.metadata,
            is_deleted: message.is_deleted,
            deleted_at: message.deleted_at,
            instance_id: message.instance_id,
            updated_at: message.updated_at,
            replicated_from: message.replicated_from,
            replicated_at: message.replicated_at,
            last_modified_by: message.last_modified_by,
            last_modified_at: message.last_modified_at,
        }
    }
}

impl TryFrom<MessageWire> for Message {
    type Error = MessageParseError;

    fn try_from(wire: MessageWire) -> Result<Self, Self::Error> {
        let kind = match wire.message_type.as_str() {
            "text" => MessageKind::Text,
            "system" => MessageKind::System,
            "file" => MessageKind::File(wire.file.ok_or(MessageParseError::MissingFile)?),
            "ai" => MessageKind::Ai {
                ai_type: wire.ai_type.ok_or(MessageParseError::MissingAiType)?,
            },
            other => return Err(MessageParseError::UnknownType(other.to_string())),
        };
        Ok(Self {
            id: wire.id,
            room: wire.room,
            sender: wire.sender,
            kind,
            content: wire.content,
            mentions: wire.mentions,
            timestamp: wire.timestamp,
            readers: wire.readers,
            reactions: wire.reactions,
            metadata: wire.metadata,
            is_deleted: wire.is_deleted,
            deleted_at: wire.deleted_at,
            instance_id: wire.instance_id,
            updated_at: wire.updated_at,
            replicated_from: wire.replicated_from,
            replicated_at: wire.replicated_at,
            last_modified_by: wire.last_modified_by,
            last_modified_at: wire.last_modified_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sender() -> UserSummary {
        UserSummary {
            id: "u1".into(),
            name: "alice".into(),
            email: "alice@example.com".into(),
            profile_image: None,
        }
    }

    fn sample_text() -> Message {
        Message::new(
            new_object_id(),
            "r1".into(),
            sample_sender(),
            MessageKind::Text,
            "hello".into(),
            vec![],
            1_700_000_000_000,
        )
    }

    #[test]
    fn message_ids_are_24_hex() {
        let id = new_object_id();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_object_id());
    }

    #[test]
    fn readers_are_unique_per_user() {
        let mut msg = sample_text();
        assert!(msg.add_reader("u2", 1));
        assert!(!msg.add_reader("u2", 2));
        assert_eq!(msg.readers.len(), 1);
        assert_eq!(msg.readers[0].read_at, 1);
    }

    #[test]
    fn reactions_have_set_semantics() {
        let mut msg = sample_text();
        assert_eq!(msg.add_reaction("👍", "u2"), vec!["u2"]);
        assert_eq!(msg.add_reaction("👍", "u2"), vec!["u2"]);
        assert_eq!(msg.add_reaction("👍", "u3"), vec!["u2", "u3"]);
    }

    #[test]
    fn removing_last_reaction_drops_the_bucket() {
        let mut msg = sample_text();
        msg.add_reaction("👍", "u2");
        assert!(msg.remove_reaction("👍", "u2").is_empty());
        assert!(!msg.reactions.contains_key("👍"));
        assert!(msg.remove_reaction("👍", "u2").is_empty());
    }

    #[test]
    fn reaction_sequences_converge_on_last_event() {
        let mut msg = sample_text();
        msg.add_reaction("🔥", "u2");
        msg.remove_reaction("🔥", "u2");
        msg.add_reaction("🔥", "u2");
        msg.add_reaction("🔥", "u2");
        assert_eq!(msg.reactions.get("🔥").map(|b| b.as_slice()), Some(&["u2".to_string()][..]));

        msg.remove_reaction("🔥", "u2");
        msg.remove_reaction("🔥", "u2");
        assert!(!msg.reactions.contains_key("🔥"));
    }

    #[test]
    fn wire_shape_is_flat() {
        let mut msg = sample_text();
        msg.add_reader("u2", 5);
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "text");
        assert_eq!(json["_id"], Value::String(msg.id.clone()));
        assert!(json.get("file").is_none());
        assert!(json.get("aiType").is_none());
        assert_eq!(json["isDeleted"], Value::Bool(false));

        let back: Message = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn file_message_round_trips() {
        let file = FileAttachment {
            filename: "a1.png".into(),
            originalname: "cat.png".into(),
            mimetype: "image/png".into(),
            size: 1024,
            s3_url: "https://bucket.s3.example.com/a1.png".into(),
            s3_key: "uploads/a1.png".into(),
            s3_bucket: "bucket".into(),
            uploaded_at: Some(1_700_000_000_000),
        };
        let msg = Message::new(
            new_object_id(),
            "r1".into(),
            sample_sender(),
            MessageKind::File(file.clone()),
            String::new(),
            vec![],
            1,
        );
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "file");
        assert_eq!(json["file"]["s3Key"], "uploads/a1.png");
        let back: Message = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.kind.file(), Some(&file));
    }

    #[test]
    fn file_type_without_descriptor_is_rejected() {
        let json = serde_json::json!({
            "_id": "aabbccddeeff001122334455",
            "room": "r1",
            "sender": sample_sender(),
            "type": "file",
            "content": "",
            "timestamp": 1,
        });
        assert!(serde_json::from_value::<Message>(json).is_err());
    }

    #[test]
    fn ai_message_keeps_its_ai_type() {
        let msg = Message::new(
            new_object_id(),
            "r1".into(),
            sample_sender(),
            MessageKind::Ai { ai_type: "wayneAI".into() },
            "answer".into(),
            vec![],
            1,
        );
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["aiType"], "wayneAI");
        let back: Message = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.kind.ai_type(), Some("wayneAI"));
    }

    #[test]
    fn soft_delete_sets_clock() {
        let mut msg = sample_text();
        msg.mark_deleted(9_000);
        assert!(msg.is_deleted);
        assert_eq!(msg.deleted_at, Some(9_000));
        assert_eq!(msg.logical_clock(), 9_000);
    }
}
