//! Append-only sync queue between the hot tier and the durable tier:
//! consumer groups, acknowledgements, bounded retries and a dead-letter
//! stream.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use parlay_entity::{SyncEvent, SyncOperation};

use crate::hot::{HotTier, HotTierError, StreamEntry};

pub const SYNC_STREAM: &str = "mongo_sync_stream";
pub const DEAD_LETTER_STREAM: &str = "mongo_sync_dead_letter";
pub const SYNC_GROUP: &str = "mongo_sync_workers";

/// Re-enqueue budget before an event is routed to the dead-letter stream.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    HotTier(#[from] HotTierError),

    #[error("malformed queue entry {id}: {detail}")]
    MalformedEntry { id: String, detail: String },

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome counters for one consume iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsumeStats {
    pub processed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
}

/// Stream-backed mutation log. Enqueue appends the full payload; consume
/// hands entries to an idempotent handler and acknowledges, re-enqueueing
/// failures with an incremented retry count until the budget is spent.
pub struct SyncQueue {
    hot: Arc<HotTier>,
    consumer: String,
}

impl SyncQueue {
    pub fn new(hot: Arc<HotTier>) -> Self {
        let consumer = format!("{}-{}", std::process::id(), Utc::now().timestamp_millis());
        Self { hot, consumer }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Creates the consumer group if it does not exist yet.
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        self.hot.stream_group_create(SYNC_STREAM, SYNC_GROUP).await?;
        Ok(())
    }

    pub async fn enqueue(
        &self,
        operation: SyncOperation,
        payload: &Value,
    ) -> Result<String, QueueError> {
        let event = SyncEvent::new(operation, payload.clone(), Utc::now().timestamp_millis());
        self.append(SYNC_STREAM, &event, None).await
    }

    async fn append(
        &self,
        stream: &str,
        event: &SyncEvent,
        final_error: Option<&str>,
    ) -> Result<String, QueueError> {
        let mut fields: Vec<(&str, String)> = vec![
            ("operation", event.operation.as_str().to_string()),
            ("data", serde_json::to_string(&event.payload)?),
            ("timestamp", event.timestamp.to_string()),
            ("retryCount", event.retry_count.to_string()),
        ];
        if let Some(original_id) = &event.original_id {
            fields.push(("originalId", original_id.clone()));
        }
        if let Some(last_error) = &event.last_error {
            fields.push(("lastError", last_error.clone()));
        }
        if let Some(final_error) = final_error {
            fields.push(("finalError", final_error.to_string()));
        }
        Ok(self.hot.stream_append(stream, &fields).await?)
    }

    /// Reads up to `count` pending entries for this consumer, invoking the
    /// handler for each. Success acknowledges; failure re-enqueues with
    /// `retryCount + 1` (or dead-letters past the budget) and acknowledges
    /// the original so the pending list never grows unbounded.
    pub async fn consume<F, Fut>(
        &self,
        handler: F,
        block: Duration,
        count: usize,
    ) -> Result<ConsumeStats, QueueError>
    where
        F: Fn(SyncEvent) -> Fut,
        Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    {
        let entries = self
            .hot
            .stream_read_group(SYNC_STREAM, SYNC_GROUP, &self.consumer, block, count)
            .await?;

        let mut stats = ConsumeStats::default();
        for entry in entries {
            let entry_id = entry.id.clone();
            let event = match parse_entry(&entry) {
                Ok(event) => event,
                Err(err) => {
                    warn!(id = %entry_id, error = %err, "dropping malformed sync entry");
                    self.hot.stream_ack(SYNC_STREAM, SYNC_GROUP, &entry_id).await?;
                    stats.malformed += 1;
                    continue;
                },
            };

            match handler(event.clone()).await {
                Ok(()) => {
                    stats.processed += 1;
                },
                Err(err) if event.retry_count < MAX_RETRIES => {
                    let retried = event.retried(&entry_id, &err.to_string());
                    debug!(
                        id = %entry_id,
                        operation = event.operation.as_str(),
                        retry_count = retried.retry_count,
                        "sync handler failed, re-enqueueing"
                    );
                    self.append(SYNC_STREAM, &retried, None).await?;
                    stats.retried += 1;
                },
                Err(err) => {
                    error!(
                        id = %entry_id,
                        operation = event.operation.as_str(),
                        retry_count = event.retry_count,
                        error = %err,
                        "sync event exhausted its retries, dead-lettering"
                    );
                    self.append(DEAD_LETTER_STREAM, &event, Some(&err.to_string())).await?;
                    stats.dead_lettered += 1;
                },
            }
            self.hot.stream_ack(SYNC_STREAM, SYNC_GROUP, &entry_id).await?;
        }
        Ok(stats)
    }

    pub async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.hot.stream_len(SYNC_STREAM).await?)
    }

    pub async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        Ok(self.hot.stream_len(DEAD_LETTER_STREAM).await?)
    }

    /// Newest dead-letter entries for the status surface.
    pub async fn dead_letters(&self, count: usize) -> Result<Vec<SyncEvent>, QueueError> {
        let entries = self.hot.stream_tail(DEAD_LETTER_STREAM, count).await?;
        Ok(entries.iter().filter_map(|entry| parse_entry(entry).ok()).collect())
    }
}

fn parse_entry(entry: &StreamEntry) -> Result<SyncEvent, QueueError> {
    let operation = entry
        .fields
        .get("operation")
        .and_then(|raw| SyncOperation::parse(raw))
        .ok_or_else(|| QueueError::MalformedEntry {
            id: entry.id.clone(),
            detail: "missing or unknown operation".to_string(),
        })?;
    let payload: Value = entry
        .fields
        .get("data")
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(|err| QueueError::MalformedEntry {
            id: entry.id.clone(),
            detail: format!("undecodable data field: {err}"),
        })?
        .ok_or_else(|| QueueError::MalformedEntry {
            id: entry.id.clone(),
            detail: "missing data field".to_string(),
        })?;
    let timestamp = entry
        .fields
        .get("timestamp")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    let retry_count = entry
        .fields
        .get("retryCount")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    Ok(SyncEvent {
        operation,
        payload,
        timestamp,
        retry_count,
        original_id: entry.fields.get("originalId").cloned(),
        last_error: entry.fields.get("lastError").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot::HotTierConfig;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &str)]) -> StreamEntry {
        StreamEntry {
            id: "1-0".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn entries_parse_back_into_events() {
        let event = parse_entry(&entry(&[
            ("operation", "CREATE_MESSAGE"),
            ("data", r#"{"_id":"m1"}"#),
            ("timestamp", "42"),
            ("retryCount", "1"),
            ("originalId", "0-1"),
            ("lastError", "boom"),
        ]))
        .expect("parse");
        assert_eq!(event.operation, SyncOperation::CreateMessage);
        assert_eq!(event.payload["_id"], "m1");
        assert_eq!(event.timestamp, 42);
        assert_eq!(event.retry_count, 1);
        assert_eq!(event.original_id.as_deref(), Some("0-1"));
        assert_eq!(event.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn unknown_operation_is_malformed() {
        let err = parse_entry(&entry(&[("operation", "EXPLODE"), ("data", "{}")]))
            .expect_err("should fail");
        assert!(matches!(err, QueueError::MalformedEntry { .. }));
    }

    #[test]
    fn missing_data_is_malformed() {
        let err = parse_entry(&entry(&[("operation", "MARK_AS_READ")])).expect_err("should fail");
        assert!(matches!(err, QueueError::MalformedEntry { .. }));
    }

    #[tokio::test]
    async fn degraded_queue_drops_writes_and_reads_nothing() {
        let config = HotTierConfig {
            master_host: "127.0.0.1".to_string(),
            master_port: 1,
            connect_timeout: std::time::Duration::from_millis(50),
            max_retries: 1,
            ..HotTierConfig::default()
        };
        let hot = Arc::new(crate::hot::HotTier::connect(config).await.expect("client"));
        assert!(hot.is_degraded());
        let queue = SyncQueue::new(hot);

        queue.ensure_group().await.expect("ensure group");
        let id = queue
            .enqueue(SyncOperation::CreateMessage, &serde_json::json!({ "_id": "m1" }))
            .await
            .expect("enqueue");
        assert!(id.is_empty());

        let stats = queue
            .consume(
                |_event| async move { Ok::<(), Box<dyn std::error::Error + Send + Sync>>(()) },
                Duration::from_millis(50),
                10,
            )
            .await
            .expect("consume");
        assert_eq!(stats.processed, 0);
        assert_eq!(queue.depth().await.expect("depth"), 0);
        assert_eq!(queue.dead_letter_depth().await.expect("dl depth"), 0);
    }
}
