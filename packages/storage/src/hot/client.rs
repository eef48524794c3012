use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value as RedisValue, from_redis_value};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hot::config::HotTierConfig;
use crate::hot::error::HotTierError;
use crate::hot::memory::MemoryEngine;
use crate::hot::types::{
    HotTierStatus, IndexField, IndexFieldKind, SearchOptions, SearchResult, StreamEntry,
};

/// Reconnect backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(3);

/// Typed facade over the key-value + JSON-document + secondary-index + stream
/// engine. Writes and scripts go to the master; reads prefer the replica when
/// cluster mode is on. After `max_retries` consecutive connectivity failures
/// the client degrades to an in-process map and every operation becomes
/// non-throwing until the engine answers a probe again.
pub struct HotTier {
    config: HotTierConfig,
    master: Mutex<Option<ConnectionManager>>,
    replica: Mutex<Option<ConnectionManager>>,
    master_client: redis::Client,
    fallback: MemoryEngine,
    degraded: AtomicBool,
    degraded_since: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    fallback_to_master: AtomicU64,
}

impl HotTier {
    /// Connects to master (and replica in cluster mode). A failed initial
    /// connect does not fail startup; the client begins degraded and probes
    /// its way back.
    pub async fn connect(config: HotTierConfig) -> Result<Self, HotTierError> {
        let master_client = redis::Client::open(config.master_url().as_str())
            .map_err(HotTierError::from_redis)?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connect_timeout)
            .set_number_of_retries(config.max_retries as usize)
            .set_max_delay(MAX_BACKOFF.as_millis() as u64);

        let master = match ConnectionManager::new_with_config(
            master_client.clone(),
            manager_config.clone(),
        )
        .await
        {
            Ok(conn) => Some(conn),
            Err(err) => {
                warn!(error = %err, "hot tier master unreachable at startup, beginning degraded");
                None
            },
        };

        let replica = if config.cluster_enabled {
            let replica_client = redis::Client::open(config.replica_url().as_str())
                .map_err(HotTierError::from_redis)?;
            match ConnectionManager::new_with_config(replica_client, manager_config).await {
                Ok(conn) => Some(conn),
                Err(err) => {
                    warn!(error = %err, "hot tier replica unreachable, reads go to master");
                    None
                },
            }
        } else {
            None
        };

        let degraded = master.is_none();
        if degraded {
            warn!("hot tier starting in degraded mode (in-process fallback)");
        } else {
            info!(
                master = %config.master_url(),
                cluster = config.cluster_enabled,
                "hot tier connected"
            );
        }

        Ok(Self {
            config,
            master: Mutex::new(master),
            replica: Mutex::new(replica),
            master_client,
            fallback: MemoryEngine::new(),
            degraded: AtomicBool::new(degraded),
            degraded_since: Mutex::new(if degraded { Some(Instant::now()) } else { None }),
            consecutive_failures: AtomicU32::new(0),
            fallback_to_master: AtomicU64::new(0),
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> HotTierStatus {
        HotTierStatus {
            degraded: self.is_degraded(),
            cluster_enabled: self.config.cluster_enabled,
            fallback_to_master: self.fallback_to_master.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            fallback_entries: self.fallback.len(),
        }
    }

    /// Whether the current call should run against the fallback. While
    /// degraded, periodically probes the real engine and recovers when it
    /// answers.
    async fn use_fallback(&self) -> bool {
        if !self.is_degraded() {
            return false;
        }
        let should_probe = {
            let since = match self.degraded_since.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            since.map(|at| at.elapsed() >= self.config.failover_timeout).unwrap_or(true)
        };
        if should_probe && self.probe().await {
            info!("hot tier recovered, leaving degraded mode");
            self.degraded.store(false, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            if let Ok(mut since) = self.degraded_since.lock() {
                *since = None;
            }
            return false;
        }
        if should_probe {
            if let Ok(mut since) = self.degraded_since.lock() {
                *since = Some(Instant::now());
            }
        }
        true
    }

    async fn probe(&self) -> bool {
        let conn = { self.master.lock().ok().and_then(|guard| guard.clone()) };
        let Some(mut conn) = conn else {
            // No manager yet; try a fresh connect.
            match ConnectionManager::new(self.master_client.clone()).await {
                Ok(conn) => {
                    if let Ok(mut guard) = self.master.lock() {
                        *guard = Some(conn);
                    }
                    return true;
                },
                Err(_) => return false,
            }
        };
        redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
    }

    fn write_conn(&self) -> Result<ConnectionManager, HotTierError> {
        self.master
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| HotTierError::Connectivity("no master connection".to_string()))
    }

    fn read_conn(&self) -> Result<ConnectionManager, HotTierError> {
        if self.config.cluster_enabled {
            if let Ok(guard) = self.replica.lock() {
                if let Some(conn) = guard.clone() {
                    return Ok(conn);
                }
            }
            self.fallback_to_master.fetch_add(1, Ordering::Relaxed);
        }
        self.write_conn()
    }

    fn track<T>(&self, result: Result<T, HotTierError>) -> Result<T, HotTierError> {
        match &result {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            },
            Err(err) if err.is_connectivity() => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.max_retries && !self.is_degraded() {
                    warn!(
                        failures,
                        "hot tier connectivity lost, degrading to in-process fallback"
                    );
                    self.degraded.store(true, Ordering::Relaxed);
                    if let Ok(mut since) = self.degraded_since.lock() {
                        *since = Some(Instant::now());
                    }
                }
            },
            Err(_) => {},
        }
        result
    }

    // ---- key/value ----

    pub async fn get(&self, key: &str) -> Result<Option<String>, HotTierError> {
        if self.use_fallback().await {
            return Ok(self.fallback.get(key));
        }
        let mut conn = self.read_conn()?;
        self.track(conn.get(key).await.map_err(HotTierError::from_redis))
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            self.fallback.set(key, value, ttl);
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        let result = match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await
            },
            None => conn.set::<_, _, ()>(key, value).await,
        };
        self.track(result.map_err(HotTierError::from_redis))
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), HotTierError> {
        self.set(key, value, Some(ttl)).await
    }

    /// SET key value NX PX ttl; true when the key was absent and is now set.
    pub async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, HotTierError> {
        if self.use_fallback().await {
            return Ok(self.fallback.set_nx(key, value, ttl));
        }
        let mut conn = self.write_conn()?;
        let reply: Result<Option<String>, _> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(HotTierError::from_redis);
        self.track(reply).map(|r| r.is_some())
    }

    pub async fn del(&self, key: &str) -> Result<bool, HotTierError> {
        if self.use_fallback().await {
            return Ok(self.fallback.del(key));
        }
        let mut conn = self.write_conn()?;
        let removed: Result<u64, _> = conn.del(key).await.map_err(HotTierError::from_redis);
        self.track(removed).map(|n| n > 0)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, HotTierError> {
        if self.use_fallback().await {
            return Ok(self.fallback.expire(key, ttl));
        }
        let mut conn = self.write_conn()?;
        let set: Result<bool, _> =
            conn.expire(key, ttl.as_secs() as i64).await.map_err(HotTierError::from_redis);
        self.track(set)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, HotTierError> {
        if self.use_fallback().await {
            return Ok(self.fallback.exists(key));
        }
        let mut conn = self.read_conn()?;
        self.track(conn.exists(key).await.map_err(HotTierError::from_redis))
    }

    pub async fn pttl(&self, key: &str) -> Result<i64, HotTierError> {
        if self.use_fallback().await {
            return Ok(self.fallback.pttl(key));
        }
        let mut conn = self.read_conn()?;
        self.track(conn.pttl(key).await.map_err(HotTierError::from_redis))
    }

    pub async fn ping(&self) -> bool {
        if self.use_fallback().await {
            return false;
        }
        let Ok(mut conn) = self.write_conn() else { return false };
        redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
    }

    // ---- scripts ----

    /// EVAL returning an integer; the shape used by the lock scripts.
    pub async fn eval_int(
        &self,
        script: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64, HotTierError> {
        if self.use_fallback().await {
            debug!("eval skipped in degraded mode");
            return Ok(0);
        }
        let mut conn = self.write_conn()?;
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        self.track(cmd.query_async(&mut conn).await.map_err(HotTierError::from_redis))
    }

    // ---- pub/sub ----

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            debug!(channel, "publish dropped in degraded mode");
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        self.track(
            conn.publish::<_, _, ()>(channel, payload).await.map_err(HotTierError::from_redis),
        )
    }

    /// Opens a dedicated subscriber connection for the given channels and
    /// forwards `(channel, payload)` pairs until the connection drops or the
    /// receiver is closed.
    pub async fn subscribe(
        &self,
        channels: Vec<String>,
    ) -> Result<mpsc::Receiver<(String, String)>, HotTierError> {
        let (tx, rx) = mpsc::channel(256);
        if self.use_fallback().await {
            debug!("subscribe unavailable in degraded mode");
            return Ok(rx);
        }
        let mut pubsub = self
            .master_client
            .get_async_pubsub()
            .await
            .map_err(HotTierError::from_redis)?;
        for channel in &channels {
            pubsub.subscribe(channel).await.map_err(HotTierError::from_redis)?;
        }
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, "undecodable pub/sub payload dropped");
                        continue;
                    },
                };
                if tx.send((channel, payload)).await.is_err() {
                    break;
                }
            }
            debug!("pub/sub forwarder stopped");
        });
        Ok(rx)
    }

    // ---- JSON documents ----

    pub async fn json_set(&self, key: &str, path: &str, value: &Value) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            // Only root documents are representable in the kv fallback.
            if path == "$" {
                self.fallback.set(key, &value.to_string(), None);
            } else {
                debug!(key, path, "json subpath write dropped in degraded mode");
            }
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        let payload = serde_json::to_string(value)?;
        let result: Result<(), _> = redis::cmd("JSON.SET")
            .arg(key)
            .arg(path)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(HotTierError::from_redis);
        self.track(result)
    }

    pub async fn json_get(&self, key: &str, path: &str) -> Result<Option<Value>, HotTierError> {
        if self.use_fallback().await {
            if path == "$" {
                return Ok(self
                    .fallback
                    .get(key)
                    .and_then(|raw| serde_json::from_str(&raw).ok()));
            }
            return Ok(None);
        }
        let mut conn = self.read_conn()?;
        let raw: Result<Option<String>, _> = redis::cmd("JSON.GET")
            .arg(key)
            .arg(path)
            .query_async(&mut conn)
            .await
            .map_err(HotTierError::from_redis);
        let raw = self.track(raw)?;
        let Some(raw) = raw else { return Ok(None) };
        let value: Value = serde_json::from_str(&raw)?;
        // JSONPath queries answer with an array of matches; `$` has exactly
        // one.
        Ok(match value {
            Value::Array(mut matches) if path.starts_with('$') => {
                if matches.is_empty() {
                    None
                } else {
                    Some(matches.swap_remove(0))
                }
            },
            other => Some(other),
        })
    }

    pub async fn json_del(&self, key: &str, path: &str) -> Result<bool, HotTierError> {
        if self.use_fallback().await {
            if path == "$" {
                return Ok(self.fallback.del(key));
            }
            return Ok(false);
        }
        let mut conn = self.write_conn()?;
        let removed: Result<u64, _> = redis::cmd("JSON.DEL")
            .arg(key)
            .arg(path)
            .query_async(&mut conn)
            .await
            .map_err(HotTierError::from_redis);
        self.track(removed).map(|n| n > 0)
    }

    // ---- secondary index ----

    /// FT.CREATE over JSON documents with the given key prefix. An
    /// already-existing index is treated as success.
    pub async fn index_create(
        &self,
        name: &str,
        prefix: &str,
        fields: &[IndexField],
    ) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            debug!(name, "index creation skipped in degraded mode");
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        let mut cmd = redis::cmd("FT.CREATE");
        cmd.arg(name)
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(prefix)
            .arg("SCHEMA");
        for field in fields {
            cmd.arg(&field.path).arg("AS").arg(&field.alias);
            match &field.kind {
                IndexFieldKind::Tag => {
                    cmd.arg("TAG");
                },
                IndexFieldKind::Text { weight, sortable } => {
                    cmd.arg("TEXT").arg("WEIGHT").arg(*weight);
                    if *sortable {
                        cmd.arg("SORTABLE");
                    }
                },
                IndexFieldKind::Numeric { sortable } => {
                    cmd.arg("NUMERIC");
                    if *sortable {
                        cmd.arg("SORTABLE");
                    }
                },
            }
        }
        let result: Result<(), _> =
            cmd.query_async(&mut conn).await.map_err(HotTierError::from_redis);
        match self.track(result) {
            Err(HotTierError::IndexExists(_)) => {
                debug!(name, "index already exists");
                Ok(())
            },
            other => other,
        }
    }

    pub async fn index_drop(&self, name: &str) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        let result: Result<(), _> = redis::cmd("FT.DROPINDEX")
            .arg(name)
            .query_async(&mut conn)
            .await
            .map_err(HotTierError::from_redis);
        self.track(result)
    }

    /// FT.SEARCH returning matching keys only; documents are fetched
    /// afterwards with `json_get`.
    pub async fn search(
        &self,
        index: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResult, HotTierError> {
        if self.use_fallback().await {
            debug!(index, "search unsupported in degraded mode");
            return Ok(SearchResult::default());
        }
        let mut conn = self.read_conn()?;
        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(index).arg(query).arg("NOCONTENT");
        if let Some(sort_by) = &options.sort_by {
            cmd.arg("SORTBY")
                .arg(sort_by)
                .arg(if options.descending { "DESC" } else { "ASC" });
        }
        cmd.arg("LIMIT").arg(options.offset).arg(options.limit);
        let reply: Result<RedisValue, _> =
            cmd.query_async(&mut conn).await.map_err(HotTierError::from_redis);
        let reply = self.track(reply)?;
        parse_search_reply(reply)
    }

    // ---- streams ----

    pub async fn stream_append(
        &self,
        stream: &str,
        fields: &[(&str, String)],
    ) -> Result<String, HotTierError> {
        if self.use_fallback().await {
            debug!(stream, "stream append dropped in degraded mode");
            return Ok(String::new());
        }
        let mut conn = self.write_conn()?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(*name).arg(value);
        }
        self.track(cmd.query_async(&mut conn).await.map_err(HotTierError::from_redis))
    }

    /// XGROUP CREATE ... MKSTREAM, treating an existing group as success.
    pub async fn stream_group_create(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => self.track(Err(HotTierError::from_redis(err))),
        }
    }

    pub async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, HotTierError> {
        if self.use_fallback().await {
            tokio::time::sleep(block.min(Duration::from_millis(100))).await;
            return Ok(Vec::new());
        }
        let mut conn = self.write_conn()?;
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: Result<StreamReadReply, _> = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(HotTierError::from_redis);
        let reply = self.track(reply)?;
        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let mut fields = std::collections::HashMap::new();
                for (name, value) in id.map {
                    let text: String = from_redis_value(&value).unwrap_or_default();
                    fields.insert(name, text);
                }
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    pub async fn stream_ack(
        &self,
        stream: &str,
        group: &str,
        id: &str,
    ) -> Result<(), HotTierError> {
        if self.use_fallback().await {
            return Ok(());
        }
        let mut conn = self.write_conn()?;
        let acked: Result<u64, _> =
            conn.xack(stream, group, &[id]).await.map_err(HotTierError::from_redis);
        self.track(acked).map(|_| ())
    }

    pub async fn stream_len(&self, stream: &str) -> Result<u64, HotTierError> {
        if self.use_fallback().await {
            return Ok(0);
        }
        let mut conn = self.read_conn()?;
        self.track(conn.xlen(stream).await.map_err(HotTierError::from_redis))
    }

    /// Newest `count` entries of a stream, used for dead-letter inspection.
    pub async fn stream_tail(
        &self,
        stream: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, HotTierError> {
        if self.use_fallback().await {
            return Ok(Vec::new());
        }
        let mut conn = self.read_conn()?;
        let reply: Result<StreamRangeReply, _> = conn
            .xrevrange_count(stream, "+", "-", count)
            .await
            .map_err(HotTierError::from_redis);
        let reply = self.track(reply)?;
        let mut entries = Vec::new();
        for id in reply.ids {
            let mut fields = std::collections::HashMap::new();
            for (name, value) in id.map {
                let text: String = from_redis_value(&value).unwrap_or_default();
                fields.insert(name, text);
            }
            entries.push(StreamEntry { id: id.id, fields });
        }
        Ok(entries)
    }
}

fn parse_search_reply(reply: RedisValue) -> Result<SearchResult, HotTierError> {
    let RedisValue::Array(items) = reply else {
        return Err(HotTierError::Protocol {
            command: "FT.SEARCH",
            detail: "expected array reply".to_string(),
        });
    };
    let mut iter = items.into_iter();
    let total = match iter.next() {
        Some(RedisValue::Int(total)) => total.max(0) as u64,
        other => {
            return Err(HotTierError::Protocol {
                command: "FT.SEARCH",
                detail: format!("expected total count, got {other:?}"),
            });
        },
    };
    let mut keys = Vec::new();
    for item in iter {
        match from_redis_value::<String>(&item) {
            Ok(key) => keys.push(key),
            Err(_) => {
                // Content pairs only appear without NOCONTENT; skip them.
                continue;
            },
        }
    }
    Ok(SearchResult { total, keys })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points at a closed port so the client starts degraded and every call
    /// exercises the fallback path.
    fn offline_config() -> HotTierConfig {
        HotTierConfig {
            master_host: "127.0.0.1".to_string(),
            master_port: 1,
            connect_timeout: Duration::from_millis(50),
            max_retries: 1,
            ..HotTierConfig::default()
        }
    }

    #[tokio::test]
    async fn degraded_client_serves_kv_from_the_fallback() {
        let hot = HotTier::connect(offline_config()).await.expect("client");
        assert!(hot.is_degraded());

        hot.set("k", "v", None).await.expect("set");
        assert_eq!(hot.get("k").await.expect("get").as_deref(), Some("v"));
        assert!(hot.exists("k").await.expect("exists"));
        assert_eq!(hot.pttl("k").await.expect("pttl"), -1);
        assert!(hot.expire("k", Duration::from_secs(60)).await.expect("expire"));
        assert!(hot.pttl("k").await.expect("pttl") > 0);
        assert!(hot.del("k").await.expect("del"));
        assert_eq!(hot.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn degraded_search_and_streams_return_empty_sentinels() {
        let hot = HotTier::connect(offline_config()).await.expect("client");

        let result = hot
            .search("idx_chat_rooms", "*", &SearchOptions::default())
            .await
            .expect("search");
        assert_eq!(result.total, 0);
        assert!(result.keys.is_empty());

        assert_eq!(hot.stream_append("s", &[("f", "v".to_string())]).await.expect("xadd"), "");
        assert!(hot.stream_tail("s", 10).await.expect("tail").is_empty());
        assert_eq!(hot.stream_len("s").await.expect("len"), 0);
        assert_eq!(hot.eval_int("return 1", &[], &[]).await.expect("eval"), 0);
        assert!(!hot.ping().await);
    }

    #[tokio::test]
    async fn degraded_json_roots_round_trip_through_the_fallback() {
        let hot = HotTier::connect(offline_config()).await.expect("client");
        let doc = serde_json::json!({ "_id": "r1", "name": "Alpha" });

        hot.json_set("chat_room:r1", "$", &doc).await.expect("json_set");
        let cached = hot.json_get("chat_room:r1", "$").await.expect("json_get");
        assert_eq!(cached, Some(doc));

        // Subpaths are not representable in the kv fallback.
        assert_eq!(hot.json_get("chat_room:r1", "$.name").await.expect("subpath"), None);
        assert!(hot.json_del("chat_room:r1", "$").await.expect("json_del"));
        assert_eq!(hot.json_get("chat_room:r1", "$").await.expect("json_get"), None);
    }

    #[tokio::test]
    async fn status_reports_degradation() {
        let hot = HotTier::connect(offline_config()).await.expect("client");
        hot.set("k", "v", None).await.expect("set");
        let status = hot.status();
        assert!(status.degraded);
        assert!(!status.cluster_enabled);
        assert_eq!(status.fallback_entries, 1);
    }

    #[test]
    fn search_reply_parses_total_and_keys() {
        let reply = RedisValue::Array(vec![
            RedisValue::Int(2),
            RedisValue::BulkString(b"message:aa".to_vec()),
            RedisValue::BulkString(b"message:bb".to_vec()),
        ]);
        let result = parse_search_reply(reply).expect("parse");
        assert_eq!(result.total, 2);
        assert_eq!(result.keys, vec!["message:aa", "message:bb"]);
    }

    #[test]
    fn empty_search_reply() {
        let result = parse_search_reply(RedisValue::Array(vec![RedisValue::Int(0)])).expect("parse");
        assert_eq!(result.total, 0);
        assert!(result.keys.is_empty());
    }

    #[test]
    fn non_array_reply_is_a_protocol_error() {
        assert!(parse_search_reply(RedisValue::Nil).is_err());
    }
}
