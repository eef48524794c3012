//! Cross-instance pub/sub: message sync, cache invalidation, health checks
//! and peer discovery over the hot tier's channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::OnceCell;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parlay_entity::SyncOperation;
use parlay_storage::hot::HotTier;

use crate::cache::message_key;
use crate::cluster::{BusCommand, PeerPool};

pub mod channels {
    pub const MESSAGE_SYNC: &str = "cross_instance:message_sync";
    pub const CACHE_INVALIDATION: &str = "cross_instance:cache_invalidation";
    pub const HEALTH_CHECK: &str = "cross_instance:health_check";
    pub const INSTANCE_DISCOVERY: &str = "cross_instance:instance_discovery";

    pub const ALL: [&str; 4] =
        [MESSAGE_SYNC, CACHE_INVALIDATION, HEALTH_CHECK, INSTANCE_DISCOVERY];
}

/// Late-bound consumer of cache-invalidation events; the realtime hub
/// registers itself after construction.
pub trait InvalidationSink: Send + Sync {
    fn keys_invalidated(&self, keys: &[String]);
}

pub struct CrossInstanceBus {
    hot: Arc<HotTier>,
    peers: Arc<PeerPool>,
    instance_id: String,
    /// host:port of this instance's hot-tier master, handed out in
    /// discovery events.
    own_endpoint: String,
    server_port: u16,
    health_interval: Duration,
    initialized: AtomicBool,
    hub: OnceCell<Arc<dyn InvalidationSink>>,
}

impl CrossInstanceBus {
    pub fn new(
        hot: Arc<HotTier>,
        peers: Arc<PeerPool>,
        instance_id: String,
        own_endpoint: String,
        server_port: u16,
        health_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            hot,
            peers,
            instance_id,
            own_endpoint,
            server_port,
            health_interval,
            initialized: AtomicBool::new(false),
            hub: OnceCell::new(),
        })
    }

    /// Late binding for the hub; used solely for cache-invalidation
    /// callbacks.
    pub fn set_invalidation_sink(&self, sink: Arc<dyn InvalidationSink>) {
        let _ = self.hub.set(sink);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Subscribes to all channels, starts the command drain and the health
    /// ticker, then announces this instance.
    pub async fn start(self: &Arc<Self>, mut commands: mpsc::UnboundedReceiver<BusCommand>) {
        let channels: Vec<String> = channels::ALL.iter().map(|c| c.to_string()).collect();
        match self.hot.subscribe(channels).await {
            Ok(mut incoming) => {
                let bus = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some((channel, payload)) = incoming.recv().await {
                        bus.handle_incoming(&channel, &payload).await;
                    }
                    debug!("cross-instance subscription closed");
                });
            },
            Err(err) => {
                warn!(error = %err, "cross-instance bus could not subscribe");
            },
        }

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    BusCommand::MessageSync { operation, payload } => {
                        bus.broadcast_message_sync(operation, &payload).await;
                    },
                    BusCommand::CacheInvalidation { keys } => {
                        bus.broadcast_cache_invalidation(&keys).await;
                    },
                }
            }
        });

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.health_interval);
            loop {
                ticker.tick().await;
                bus.broadcast_health("ping").await;
            }
        });

        self.broadcast_discovery().await;
        self.initialized.store(true, Ordering::Relaxed);
        info!(instance_id = %self.instance_id, "cross-instance bus started");
    }

    fn envelope(&self, mut payload: Value) -> Value {
        if let Value::Object(map) = &mut payload {
            map.insert("sourceInstance".to_string(), json!(self.instance_id));
            map.insert("timestamp".to_string(), json!(Utc::now().timestamp_millis()));
        }
        payload
    }

    async fn publish(&self, channel: &str, payload: Value) {
        let enveloped = self.envelope(payload);
        if let Err(err) = self.hot.publish(channel, &enveloped.to_string()).await {
            debug!(channel, error = %err, "cross-instance publish failed");
        }
    }

    pub async fn broadcast_message_sync(&self, operation: SyncOperation, payload: &Value) {
        self.publish(
            channels::MESSAGE_SYNC,
            json!({ "operation": operation.as_str(), "payload": payload }),
        )
        .await;
    }

    pub async fn broadcast_cache_invalidation(&self, keys: &[String]) {
        self.publish(channels::CACHE_INVALIDATION, json!({ "keys": keys })).await;
    }

    async fn broadcast_health(&self, kind: &str) {
        self.publish(channels::HEALTH_CHECK, json!({ "kind": kind })).await;
    }

    async fn broadcast_discovery(&self) {
        self.publish(
            channels::INSTANCE_DISCOVERY,
            json!({
                "instanceEndpoint": self.own_endpoint,
                "serverPort": self.server_port,
            }),
        )
        .await;
    }

    async fn handle_incoming(&self, channel: &str, raw: &str) {
        let event: Value = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(err) => {
                debug!(channel, error = %err, "undecodable cross-instance event dropped");
                return;
            },
        };
        let source = event.get("sourceInstance").and_then(Value::as_str).unwrap_or_default();
        if source == self.instance_id {
            return;
        }

        match channel {
            channels::MESSAGE_SYNC => self.handle_message_sync(&event).await,
            channels::CACHE_INVALIDATION => self.handle_cache_invalidation(&event).await,
            channels::HEALTH_CHECK => self.handle_health(source, &event).await,
            channels::INSTANCE_DISCOVERY => self.handle_discovery(source, &event).await,
            other => debug!(channel = other, "event on unknown channel"),
        }
    }

    /// CREATE caches without overwriting; UPDATE overwrites only when the
    /// document is already cached locally.
    async fn handle_message_sync(&self, event: &Value) {
        let Some(operation) = event
            .get("operation")
            .and_then(Value::as_str)
            .and_then(SyncOperation::parse)
        else {
            return;
        };
        let Some(payload) = event.get("payload") else { return };
        let Some(message_id) = payload.get("_id").and_then(Value::as_str) else { return };
        let key = message_key(message_id);

        let cached = match self.hot.exists(&key).await {
            Ok(cached) => cached,
            Err(err) => {
                debug!(error = %err, "message-sync existence check failed");
                return;
            },
        };
        let should_write = match operation {
            SyncOperation::CreateMessage => !cached,
            SyncOperation::UpdateMessage => cached,
            _ => false,
        };
        if should_write {
            if let Err(err) = self.hot.json_set(&key, "$", payload).await {
                debug!(key = %key, error = %err, "message-sync cache write failed");
            }
        }
    }

    async fn handle_cache_invalidation(&self, event: &Value) {
        let Some(keys) = event.get("keys").and_then(Value::as_array) else { return };
        let keys: Vec<String> = keys
            .iter()
            .filter_map(|key| key.as_str().map(|k| k.to_string()))
            .collect();
        for key in &keys {
            if let Err(err) = self.hot.del(key).await {
                debug!(key = %key, error = %err, "cache invalidation delete failed");
            }
        }
        if let Some(hub) = self.hub.get() {
            hub.keys_invalidated(&keys);
        }
    }

    async fn handle_health(&self, source: &str, event: &Value) {
        self.peers.touch(source).await;
        if event.get("kind").and_then(Value::as_str) == Some("ping") {
            self.broadcast_health("pong").await;
        }
    }

    async fn handle_discovery(&self, source: &str, event: &Value) {
        let Some(endpoint) = event.get("instanceEndpoint").and_then(Value::as_str) else {
            return;
        };
        let http_base_url = event
            .get("serverPort")
            .and_then(Value::as_u64)
            .and_then(|port| {
                endpoint
                    .split_once(':')
                    .map(|(host, _)| format!("http://{host}:{port}"))
            });
        let newly_added = self.peers.add_peer(source, endpoint, http_base_url).await;
        if newly_added {
            // Announce ourselves so the new instance learns this endpoint
            // too.
            self.broadcast_discovery().await;
        }
    }
}
