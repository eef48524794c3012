//! Singleton worker loop draining the sync queue into the durable tier.
//! Every handler is an idempotent upsert or guarded update, and failures
//! propagate so the queue retries and eventually dead-letters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use mongodb::bson::to_document;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use parlay_entity::{Message, SyncEvent, SyncOperation};
use parlay_storage::queue::SyncQueue;
use parlay_storage::repository::MessageRepository;

const CONSUME_BLOCK: Duration = Duration::from_secs(5);
const IDLE_SLEEP: Duration = Duration::from_millis(100);
const CONSUME_BATCH: usize = 10;

type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    errors: AtomicU64,
    create_message: AtomicU64,
    update_message: AtomicU64,
    mark_as_read: AtomicU64,
    add_reaction: AtomicU64,
    remove_reaction: AtomicU64,
    delete_message: AtomicU64,
}

impl Counters {
    fn for_operation(&self, operation: SyncOperation) -> &AtomicU64 {
        match operation {
            SyncOperation::CreateMessage => &self.create_message,
            SyncOperation::UpdateMessage => &self.update_message,
            SyncOperation::MarkAsRead => &self.mark_as_read,
            SyncOperation::AddReaction => &self.add_reaction,
            SyncOperation::RemoveReaction => &self.remove_reaction,
            SyncOperation::DeleteMessage => &self.delete_message,
        }
    }
}

/// Snapshot of the worker's counters for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SyncWorkerStats {
    pub running: bool,
    pub processed: u64,
    pub errors: u64,
    #[serde(rename = "byOperation")]
    pub by_operation: HashMap<String, u64>,
}

pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    messages: MessageRepository,
    counters: Counters,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl SyncWorker {
    pub fn new(queue: Arc<SyncQueue>, messages: MessageRepository) -> Arc<Self> {
        Arc::new(Self {
            queue,
            messages,
            counters: Counters::default(),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        })
    }

    /// Main loop: ensure the consumer group exists, then consume with a 5 s
    /// block and a 100 ms idle cadence until stopped.
    pub async fn run(self: Arc<Self>) {
        if let Err(err) = self.queue.ensure_group().await {
            error!(error = %err, "could not ensure the sync consumer group");
        }
        self.running.store(true, Ordering::Relaxed);
        info!(consumer = self.queue.consumer_name(), "sync worker started");

        while !self.stop_requested.load(Ordering::Relaxed) {
            let worker = Arc::clone(&self);
            let result = self
                .queue
                .consume(
                    move |event| {
                        let worker = Arc::clone(&worker);
                        async move { worker.apply(event).await }
                    },
                    CONSUME_BLOCK,
                    CONSUME_BATCH,
                )
                .await;
            match result {
                Ok(stats) => {
                    if stats.processed > 0 {
                        self.counters.processed.fetch_add(stats.processed, Ordering::Relaxed);
                    }
                    let failures = stats.retried + stats.dead_lettered + stats.malformed;
                    if failures > 0 {
                        self.counters.errors.fetch_add(failures, Ordering::Relaxed);
                    }
                },
                Err(err) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %err, "sync consume iteration failed");
                },
            }
            tokio::time::sleep(IDLE_SLEEP).await;
        }

        self.running.store(false, Ordering::Relaxed);
        info!("sync worker stopped");
    }

    /// Requests a graceful stop; the loop drains its in-flight iteration and
    /// exits.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SyncWorkerStats {
        let mut by_operation = HashMap::new();
        for operation in SyncOperation::ALL {
            by_operation.insert(
                operation.as_str().to_string(),
                self.counters.for_operation(operation).load(Ordering::Relaxed),
            );
        }
        SyncWorkerStats {
            running: self.running.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            by_operation,
        }
    }

    /// Applies one event to the durable tier. Must return `Err` on failure
    /// so the queue retries.
    async fn apply(&self, event: SyncEvent) -> Result<(), HandlerError> {
        let operation = event.operation;
        match operation {
            SyncOperation::CreateMessage => self.apply_create(&event.payload).await?,
            SyncOperation::UpdateMessage => self.apply_update(&event.payload).await?,
            SyncOperation::MarkAsRead => self.apply_mark_as_read(&event.payload).await?,
            SyncOperation::AddReaction => {
                self.apply_reaction(&event.payload, true).await?;
            },
            SyncOperation::RemoveReaction => {
                self.apply_reaction(&event.payload, false).await?;
            },
            SyncOperation::DeleteMessage => self.apply_delete(&event.payload).await?,
        }
        self.counters.for_operation(operation).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn apply_create(&self, payload: &Value) -> Result<(), HandlerError> {
        let message: Message = serde_json::from_value(payload.clone())?;
        match self.messages.upsert(&message).await {
            Ok(()) => Ok(()),
            // A replayed create racing an earlier apply is success.
            Err(err) if err.is_duplicate_key() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn apply_update(&self, payload: &Value) -> Result<(), HandlerError> {
        let message_id = require_str(payload, "messageId")
            .or_else(|_| require_str(payload, "_id"))?;
        let update = payload
            .get("updateData")
            .cloned()
            .unwrap_or_else(|| payload.clone());
        let fields = to_document(&update)?;
        self.messages.set_fields(&message_id, fields).await?;
        Ok(())
    }

    async fn apply_mark_as_read(&self, payload: &Value) -> Result<(), HandlerError> {
        let message_id = require_str(payload, "messageId")?;
        let user_id = require_str(payload, "userId")?;
        let read_at = payload.get("readAt").and_then(Value::as_i64).unwrap_or_default();
        self.messages.mark_as_read(&message_id, &user_id, read_at).await?;
        Ok(())
    }

    async fn apply_reaction(&self, payload: &Value, add: bool) -> Result<(), HandlerError> {
        let message_id = require_str(payload, "messageId")?;
        let emoji = require_str(payload, "emoji")?;
        let user_id = require_str(payload, "userId")?;
        let at = payload.get("at").and_then(Value::as_i64).unwrap_or_default();
        if add {
            self.messages.add_reaction(&message_id, &emoji, &user_id, at).await?;
        } else {
            self.messages.remove_reaction(&message_id, &emoji, &user_id, at).await?;
        }
        Ok(())
    }

    async fn apply_delete(&self, payload: &Value) -> Result<(), HandlerError> {
        let message_id = require_str(payload, "messageId")
            .or_else(|_| require_str(payload, "_id"))?;
        let deleted_at = payload.get("deletedAt").and_then(Value::as_i64).unwrap_or_default();
        self.messages.soft_delete(&message_id, deleted_at).await?;
        Ok(())
    }
}

fn require_str(payload: &Value, field: &str) -> Result<String, HandlerError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(|value| value.to_string())
        .ok_or_else(|| format!("sync payload missing field {field}").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_str_extracts_fields() {
        let payload = json!({ "messageId": "m1", "count": 2 });
        assert_eq!(require_str(&payload, "messageId").expect("present"), "m1");
        assert!(require_str(&payload, "count").is_err());
        assert!(require_str(&payload, "missing").is_err());
    }
}
