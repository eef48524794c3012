use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mutation kinds carried by the sync queue from the hot tier to the
/// durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOperation {
    #[serde(rename = "CREATE_MESSAGE")]
    CreateMessage,
    #[serde(rename = "UPDATE_MESSAGE")]
    UpdateMessage,
    #[serde(rename = "MARK_AS_READ")]
    MarkAsRead,
    #[serde(rename = "ADD_REACTION")]
    AddReaction,
    #[serde(rename = "REMOVE_REACTION")]
    RemoveReaction,
    #[serde(rename = "DELETE_MESSAGE")]
    DeleteMessage,
}

impl SyncOperation {
    pub const ALL: [SyncOperation; 6] = [
        SyncOperation::CreateMessage,
        SyncOperation::UpdateMessage,
        SyncOperation::MarkAsRead,
        SyncOperation::AddReaction,
        SyncOperation::RemoveReaction,
        SyncOperation::DeleteMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::CreateMessage => "CREATE_MESSAGE",
            SyncOperation::UpdateMessage => "UPDATE_MESSAGE",
            SyncOperation::MarkAsRead => "MARK_AS_READ",
            SyncOperation::AddReaction => "ADD_REACTION",
            SyncOperation::RemoveReaction => "REMOVE_REACTION",
            SyncOperation::DeleteMessage => "DELETE_MESSAGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == value)
    }
}

/// One append-only record in the sync stream. The payload embeds the full
/// message state at enqueue time so handlers never need the hot tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub operation: SyncOperation,
    pub payload: Value,
    /// Epoch milliseconds at enqueue time.
    pub timestamp: i64,
    #[serde(rename = "retryCount", default)]
    pub retry_count: u32,
    /// Stream id of the first enqueue, set once the event has been retried.
    #[serde(rename = "originalId", default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(rename = "lastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncEvent {
    pub fn new(operation: SyncOperation, payload: Value, timestamp: i64) -> Self {
        Self {
            operation,
            payload,
            timestamp,
            retry_count: 0,
            original_id: None,
            last_error: None,
        }
    }

    /// The follow-up event appended after a failed apply. Keeps the original
    /// stream id so the dead-letter trail stays traceable.
    pub fn retried(&self, original_id: &str, error: &str) -> Self {
        Self {
            operation: self.operation,
            payload: self.payload.clone(),
            timestamp: self.timestamp,
            retry_count: self.retry_count + 1,
            original_id: Some(self.original_id.clone().unwrap_or_else(|| original_id.to_string())),
            last_error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operations_round_trip_their_names() {
        for op in SyncOperation::ALL {
            assert_eq!(SyncOperation::parse(op.as_str()), Some(op));
        }
        assert_eq!(SyncOperation::parse("NOPE"), None);
    }

    #[test]
    fn retried_events_keep_the_first_stream_id() {
        let event = SyncEvent::new(SyncOperation::CreateMessage, json!({"_id": "m1"}), 10);
        let first_retry = event.retried("1-0", "boom");
        assert_eq!(first_retry.retry_count, 1);
        assert_eq!(first_retry.original_id.as_deref(), Some("1-0"));

        let second_retry = first_retry.retried("2-0", "boom again");
        assert_eq!(second_retry.retry_count, 2);
        assert_eq!(second_retry.original_id.as_deref(), Some("1-0"));
        assert_eq!(second_retry.last_error.as_deref(), Some("boom again"));
    }
}
