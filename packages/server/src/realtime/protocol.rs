//! JSON frames exchanged with realtime clients. Every frame is
//! `{"event": <name>, "data": <payload>}` in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parlay_entity::{FileAttachment, Message, UserSummary};

use crate::realtime::ai_stream::ActiveStream;

/// First frame a client sends after the transport opens.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthFrame {
    pub token: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Client → server events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinRoom")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "leaveRoom")]
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "fetchPreviousMessages")]
    FetchPreviousMessages {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(default)]
        before: Option<i64>,
    },
    #[serde(rename = "chatMessage")]
    ChatMessage {
        room: String,
        #[serde(rename = "type")]
        message_type: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(rename = "fileData", default)]
        file_data: Option<FileAttachment>,
    },
    #[serde(rename = "markMessagesAsRead")]
    MarkMessagesAsRead {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "messageIds")]
        message_ids: Vec<String>,
    },
    #[serde(rename = "messageReaction")]
    MessageReaction {
        #[serde(rename = "messageId")]
        message_id: String,
        reaction: String,
        #[serde(rename = "type")]
        action: ReactionAction,
    },
    #[serde(rename = "force_login")]
    ForceLogin { token: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "joinRoomSuccess")]
    JoinRoomSuccess {
        #[serde(rename = "roomId")]
        room_id: String,
        participants: Vec<UserSummary>,
        messages: Vec<Message>,
        #[serde(rename = "hasMore")]
        has_more: bool,
        #[serde(rename = "oldestTimestamp", skip_serializing_if = "Option::is_none")]
        oldest_timestamp: Option<i64>,
        #[serde(rename = "activeStreams")]
        active_streams: Vec<ActiveStream>,
    },
    #[serde(rename = "joinRoomError")]
    JoinRoomError { message: String },
    #[serde(rename = "message")]
    Message(Box<Message>),
    #[serde(rename = "participantsUpdate")]
    ParticipantsUpdate {
        #[serde(rename = "roomId")]
        room_id: String,
        participants: Vec<UserSummary>,
    },
    #[serde(rename = "userLeft")]
    UserLeft {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        name: String,
    },
    #[serde(rename = "messageLoadStart")]
    MessageLoadStart {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "previousMessagesLoaded")]
    PreviousMessagesLoaded {
        #[serde(rename = "roomId")]
        room_id: String,
        messages: Vec<Message>,
        #[serde(rename = "hasMore")]
        has_more: bool,
        #[serde(rename = "oldestTimestamp", skip_serializing_if = "Option::is_none")]
        oldest_timestamp: Option<i64>,
    },
    #[serde(rename = "messagesRead")]
    MessagesRead {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "messageIds")]
        message_ids: Vec<String>,
    },
    #[serde(rename = "messageReactionUpdate")]
    MessageReactionUpdate {
        #[serde(rename = "messageId")]
        message_id: String,
        reactions: std::collections::BTreeMap<String, Vec<String>>,
    },
    #[serde(rename = "aiMessageStart")]
    AiMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "aiType")]
        ai_type: String,
        timestamp: i64,
    },
    #[serde(rename = "aiMessageChunk")]
    AiMessageChunk {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "currentChunk")]
        current_chunk: String,
        #[serde(rename = "fullContent")]
        full_content: String,
        #[serde(rename = "isCodeBlock")]
        is_code_block: bool,
        timestamp: i64,
        #[serde(rename = "aiType")]
        ai_type: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
    #[serde(rename = "aiMessageComplete")]
    AiMessageComplete {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "_id")]
        persisted_id: String,
        content: String,
        #[serde(rename = "aiType")]
        ai_type: String,
        timestamp: i64,
        #[serde(rename = "isComplete")]
        is_complete: bool,
        query: String,
        reactions: Value,
    },
    #[serde(rename = "aiMessageError")]
    AiMessageError {
        #[serde(rename = "messageId")]
        message_id: String,
        error: String,
        #[serde(rename = "aiType")]
        ai_type: String,
    },
    #[serde(rename = "roomCreated")]
    RoomCreated { room: parlay_entity::RoomView },
    #[serde(rename = "roomUpdate")]
    RoomUpdate { room: parlay_entity::RoomView },
    #[serde(rename = "duplicate_login")]
    DuplicateLogin {
        #[serde(rename = "deviceInfo")]
        device_info: String,
        #[serde(rename = "ipAddress")]
        ip_address: String,
        timestamp: i64,
    },
    #[serde(rename = "session_ended")]
    SessionEnded { reason: String },
    #[serde(rename = "error")]
    Error { message: String },
}

/// What the per-connection writer task consumes.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Event(ServerEvent),
    /// Pre-session frames (handshake failures) that bypass the event
    /// envelope.
    Raw(String),
    /// Force-close the transport after flushing.
    Close,
}

impl ServerEvent {
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"error","data":{"message":"serialization failure"}}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_parse_from_tagged_frames() {
        let frame = json!({ "event": "joinRoom", "data": { "roomId": "r1" } });
        let event: ClientEvent = serde_json::from_value(frame).expect("parse");
        assert!(matches!(event, ClientEvent::JoinRoom { room_id } if room_id == "r1"));

        let frame = json!({
            "event": "messageReaction",
            "data": { "messageId": "m1", "reaction": "👍", "type": "add" }
        });
        let event: ClientEvent = serde_json::from_value(frame).expect("parse");
        assert!(matches!(
            event,
            ClientEvent::MessageReaction { action: ReactionAction::Add, .. }
        ));
    }

    #[test]
    fn chat_message_accepts_optional_fields() {
        let frame = json!({
            "event": "chatMessage",
            "data": { "room": "r1", "type": "text", "content": "hi" }
        });
        let event: ClientEvent = serde_json::from_value(frame).expect("parse");
        match event {
            ClientEvent::ChatMessage { room, message_type, content, file_data } => {
                assert_eq!(room, "r1");
                assert_eq!(message_type, "text");
                assert_eq!(content.as_deref(), Some("hi"));
                assert!(file_data.is_none());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_events_serialize_with_event_tag() {
        let frame = ServerEvent::SessionEnded { reason: "duplicate_login".into() }.to_frame();
        let value: Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value["event"], "session_ended");
        assert_eq!(value["data"]["reason"], "duplicate_login");
    }

    #[test]
    fn auth_frame_parses() {
        let frame: AuthFrame =
            serde_json::from_value(json!({ "token": "t", "sessionId": "s" })).expect("parse");
        assert_eq!(frame.token, "t");
        assert_eq!(frame.session_id, "s");
    }
}
