//! In-memory streaming sessions for in-progress AI responses. A session is
//! STREAMING while present in the map; completion, error and disconnect all
//! remove it, which is what makes late callbacks no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::ai::AiKind;

/// Projection of a streaming session sent to clients joining mid-stream.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveStream {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "aiType")]
    pub ai_type: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct StreamingSession {
    pub message_id: String,
    pub room_id: String,
    pub owner_user_id: String,
    pub kind: AiKind,
    pub content: String,
    pub started_at: i64,
    pub last_update_at: i64,
}

/// Per-instance map of live streams, keyed by streaming-session id
/// (`<aiType>-<epochMs>`).
#[derive(Default)]
pub struct StreamingSessions {
    sessions: RwLock<HashMap<String, StreamingSession>>,
}

impl StreamingSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocates a session id (`<aiType>-<epochMs>`, nudged forward on a
    /// same-millisecond collision) and registers the stream.
    pub async fn start(&self, room_id: &str, owner_user_id: &str, kind: AiKind) -> String {
        let mut now = Utc::now().timestamp_millis();
        let mut message_id = format!("{}-{}", kind.handle(), now);
        while self.sessions.read().await.contains_key(&message_id) {
            now += 1;
            message_id = format!("{}-{}", kind.handle(), now);
        }
        let session = StreamingSession {
            message_id: message_id.clone(),
            room_id: room_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            kind,
            content: String::new(),
            started_at: now,
            last_update_at: now,
        };
        self.sessions.write().await.insert(message_id.clone(), session);
        message_id
    }

    /// Appends a chunk and returns the accumulated content, or None when the
    /// session was already removed (cancelled).
    pub async fn append_chunk(&self, message_id: &str, chunk: &str) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(message_id)?;
        session.content.push_str(chunk);
        session.last_update_at = Utc::now().timestamp_millis();
        Some(session.content.clone())
    }

    pub async fn is_active(&self, message_id: &str) -> bool {
        self.sessions.read().await.contains_key(message_id)
    }

    pub async fn remove(&self, message_id: &str) -> Option<StreamingSession> {
        self.sessions.write().await.remove(message_id)
    }

    pub async fn active_for_room(&self, room_id: &str) -> Vec<ActiveStream> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.room_id == room_id)
            .map(|session| ActiveStream {
                message_id: session.message_id.clone(),
                ai_type: session.kind.handle().to_string(),
                content: session.content.clone(),
                timestamp: session.started_at,
            })
            .collect()
    }

    /// Drops every stream a user owns in a room (leave) or anywhere
    /// (disconnect when `room_id` is None).
    pub async fn remove_owned_by(&self, user_id: &str, room_id: Option<&str>) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let doomed: Vec<String> = sessions
            .values()
            .filter(|session| {
                session.owner_user_id == user_id
                    && room_id.map(|room| session.room_id == room).unwrap_or(true)
            })
            .map(|session| session.message_id.clone())
            .collect();
        for id in &doomed {
            sessions.remove(id);
        }
        doomed
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_accumulate_chunks() {
        let sessions = StreamingSessions::new();
        let id = sessions.start("r1", "u1", AiKind::WayneAi).await;
        assert!(id.starts_with("wayneAI-"));
        assert_eq!(sessions.append_chunk(&id, "hel").await.as_deref(), Some("hel"));
        assert_eq!(sessions.append_chunk(&id, "lo").await.as_deref(), Some("hello"));
        let active = sessions.active_for_room("r1").await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "hello");
    }

    #[tokio::test]
    async fn removed_sessions_ignore_late_chunks() {
        let sessions = StreamingSessions::new();
        let id = sessions.start("r1", "u1", AiKind::ConsultingAi).await;
        assert!(sessions.remove(&id).await.is_some());
        assert!(sessions.append_chunk(&id, "late").await.is_none());
        assert!(!sessions.is_active(&id).await);
    }

    #[tokio::test]
    async fn disconnect_clears_only_owned_streams() {
        let sessions = StreamingSessions::new();
        let mine = sessions.start("r1", "u1", AiKind::WayneAi).await;
        let theirs = sessions.start("r1", "u2", AiKind::WayneAi).await;
        let removed = sessions.remove_owned_by("u1", Some("r1")).await;
        assert_eq!(removed, vec![mine]);
        assert!(sessions.is_active(&theirs).await);
    }
}
