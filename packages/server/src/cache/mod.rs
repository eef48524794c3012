//! Read-through room cache and write-back message cache over the hot tier.

mod message_cache;
mod room_cache;

pub use message_cache::{
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, MessageBatch, MessageCacheService, NewMessage,
    ReactionUpdate,
};
pub use room_cache::{RoomCacheService, RoomListQuery, RoomListResponse};

use std::sync::Arc;

use parlay_storage::hot::{HotTier, HotTierError, IndexField};

pub const ROOM_INDEX: &str = "idx_chat_rooms";
pub const ROOM_KEY_PREFIX: &str = "chat_room:";
pub const MESSAGE_INDEX: &str = "idx_chat_messages";
pub const MESSAGE_KEY_PREFIX: &str = "message:";

pub fn room_key(room_id: &str) -> String {
    format!("{ROOM_KEY_PREFIX}{room_id}")
}

pub fn message_key(message_id: &str) -> String {
    format!("{MESSAGE_KEY_PREFIX}{message_id}")
}

fn room_index_fields() -> Vec<IndexField> {
    vec![
        IndexField::tag("$._id", "_id"),
        IndexField::text_sortable("$.name", "name", 1.0),
        IndexField::tag("$.hasPassword", "hasPassword"),
        IndexField::tag("$.creator._id", "creatorId"),
        IndexField::text("$.creator.name", "creatorName", 1.0),
        IndexField::tag("$.participants[*]._id", "participantId"),
        IndexField::numeric("$.participantsCount", "participantsCount", true),
        IndexField::numeric("$.createdAt", "createdAt", true),
    ]
}

fn message_index_fields() -> Vec<IndexField> {
    vec![
        IndexField::tag("$._id", "_id"),
        IndexField::tag("$.room", "room"),
        IndexField::text("$.content", "content", 1.0),
        IndexField::tag("$.sender._id", "senderId"),
        IndexField::text("$.sender.name", "senderName", 1.0),
        IndexField::tag("$.type", "type"),
        IndexField::tag("$.file.filename", "fileName"),
        IndexField::tag("$.aiType", "aiType"),
        IndexField::numeric("$.timestamp", "timestamp", true),
        IndexField::tag("$.readers[*].userId", "readerId"),
        IndexField::tag("$.isDeleted", "isDeleted"),
    ]
}

/// Creates both secondary indices, treating already-present ones as success.
pub async fn ensure_indices(hot: &Arc<HotTier>) -> Result<(), HotTierError> {
    hot.index_create(ROOM_INDEX, ROOM_KEY_PREFIX, &room_index_fields()).await?;
    hot.index_create(MESSAGE_INDEX, MESSAGE_KEY_PREFIX, &message_index_fields()).await?;
    Ok(())
}

/// Escapes a user-supplied term for use inside a search expression.
fn escape_search_term(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_alphanumeric() {
            escaped.push(c);
        } else if !c.is_whitespace() {
            escaped.push('\\');
            escaped.push(c);
        } else {
            escaped.push(' ');
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_their_prefixes() {
        assert_eq!(room_key("r1"), "chat_room:r1");
        assert_eq!(message_key("m1"), "message:m1");
    }

    #[test]
    fn search_terms_escape_query_syntax() {
        assert_eq!(escape_search_term("alpha"), "alpha");
        assert_eq!(escape_search_term("a-b"), "a\\-b");
        assert_eq!(escape_search_term("스터디 방"), "스터디 방");
    }
}
