//! Distributed mutual exclusion over the hot tier's shared key space.
//! Ownership is holder-token equality; release and renew are atomic
//! compare-and-act scripts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hot::{HotTier, HotTierError};

const LOCK_PREFIX: &str = "distributed_lock:";

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: u32 = 50;
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";
const RENEW_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('pexpire', KEYS[1], ARGV[2]) else return 0 end";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to acquire distributed lock")]
    Contention { resource: String },

    #[error(transparent)]
    HotTier(#[from] HotTierError),
}

struct HeldLock {
    value: String,
    ttl: Duration,
    auto_renew: Option<JoinHandle<()>>,
}

/// Mutex over named resources. Holder tokens are
/// `<instanceId>:<epochMs>:<nonce>`; mutual exclusion holds while the hot
/// tier is reachable and clock skew stays below the TTL. A failed renew is
/// treated as immediate loss of ownership.
pub struct LockService {
    hot: Arc<HotTier>,
    instance_id: String,
    held: Mutex<HashMap<String, HeldLock>>,
}

impl LockService {
    pub fn new(hot: Arc<HotTier>, instance_id: String) -> Arc<Self> {
        Arc::new(Self { hot, instance_id, held: Mutex::new(HashMap::new()) })
    }

    fn key(resource: &str) -> String {
        format!("{LOCK_PREFIX}{resource}")
    }

    fn new_token(&self) -> String {
        let mut nonce = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce: String = nonce.iter().map(|b| format!("{b:02x}")).collect();
        format!("{}:{}:{}", self.instance_id, Utc::now().timestamp_millis(), nonce)
    }

    /// SET NX PX with bounded retries at a 100 ms cadence.
    pub async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        retries: u32,
    ) -> Result<(), LockError> {
        let key = Self::key(resource);
        let value = self.new_token();
        for attempt in 0..=retries {
            if self.hot.set_nx_px(&key, &value, ttl).await? {
                debug!(resource, attempt, "lock acquired");
                self.held.lock().await.insert(
                    resource.to_string(),
                    HeldLock { value, ttl, auto_renew: None },
                );
                return Ok(());
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
        warn!(resource, retries, "lock acquisition exhausted its retries");
        Err(LockError::Contention { resource: resource.to_string() })
    }

    pub async fn acquire_default(&self, resource: &str) -> Result<(), LockError> {
        self.acquire(resource, DEFAULT_TTL, DEFAULT_RETRIES).await
    }

    /// Deletes the key only when this instance still holds it. Always drops
    /// the local record.
    pub async fn release(&self, resource: &str) -> Result<bool, LockError> {
        let held = {
            let mut held = self.held.lock().await;
            held.remove(resource)
        };
        let Some(held) = held else { return Ok(false) };
        if let Some(task) = held.auto_renew {
            task.abort();
        }
        let key = Self::key(resource);
        let released = if self.hot.is_degraded() {
            // Single-process compare-and-delete against the fallback map.
            match self.hot.get(&key).await? {
                Some(current) if current == held.value => self.hot.del(&key).await?,
                _ => false,
            }
        } else {
            self.hot.eval_int(RELEASE_SCRIPT, &[&key], &[&held.value]).await? == 1
        };
        debug!(resource, released, "lock released");
        Ok(released)
    }

    /// Extends the TTL when still the holder. A `false` return means
    /// ownership was lost; the local record is dropped in that case.
    pub async fn renew(&self, resource: &str, ttl: Duration) -> Result<bool, LockError> {
        let value = {
            let held = self.held.lock().await;
            match held.get(resource) {
                Some(lock) => lock.value.clone(),
                None => return Ok(false),
            }
        };
        let key = Self::key(resource);
        let renewed = if self.hot.is_degraded() {
            match self.hot.get(&key).await? {
                Some(current) if current == value => self.hot.expire(&key, ttl).await?,
                _ => false,
            }
        } else {
            let ttl_ms = ttl.as_millis().to_string();
            self.hot.eval_int(RENEW_SCRIPT, &[&key], &[&value, &ttl_ms]).await? == 1
        };
        if !renewed {
            warn!(resource, "lock renewal failed, treating as lost ownership");
            let mut held = self.held.lock().await;
            if let Some(lock) = held.remove(resource) {
                if let Some(task) = lock.auto_renew {
                    task.abort();
                }
            }
        }
        Ok(renewed)
    }

    /// Schedules periodic renewal for a held lock. The task stops itself on
    /// the first failed renew and lets the lock expire.
    pub async fn enable_auto_renewal(self: &Arc<Self>, resource: &str, interval: Duration) {
        let ttl = {
            let held = self.held.lock().await;
            match held.get(resource) {
                Some(lock) => lock.ttl,
                None => return,
            }
        };
        let service = Arc::clone(self);
        let resource_name = resource.to_string();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match service.renew(&resource_name, ttl).await {
                    Ok(true) => {},
                    Ok(false) => break,
                    Err(err) => {
                        warn!(resource = %resource_name, error = %err, "auto-renew errored");
                        break;
                    },
                }
            }
        });
        let mut held = self.held.lock().await;
        if let Some(lock) = held.get_mut(resource) {
            if let Some(previous) = lock.auto_renew.replace(task) {
                previous.abort();
            }
        } else {
            task.abort();
        }
    }

    /// True when the hot tier still maps the resource to our token.
    pub async fn is_lock_owner(&self, resource: &str) -> Result<bool, LockError> {
        let value = {
            let held = self.held.lock().await;
            match held.get(resource) {
                Some(lock) => lock.value.clone(),
                None => return Ok(false),
            }
        };
        Ok(self.hot.get(&Self::key(resource)).await?.as_deref() == Some(value.as_str()))
    }

    /// Drops local records whose keys no longer exist in the hot tier.
    pub async fn cleanup_expired_locks(&self) -> Result<usize, LockError> {
        let resources: Vec<String> = {
            let held = self.held.lock().await;
            held.keys().cloned().collect()
        };
        let mut dropped = 0;
        for resource in resources {
            if !self.hot.exists(&Self::key(&resource)).await? {
                let mut held = self.held.lock().await;
                if let Some(lock) = held.remove(&resource) {
                    if let Some(task) = lock.auto_renew {
                        task.abort();
                    }
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            info!(dropped, "cleaned up expired lock records");
        }
        Ok(dropped)
    }

    pub async fn active_locks(&self) -> Vec<String> {
        self.held.lock().await.keys().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.held.lock().await.len()
    }

    /// Releases everything this instance still holds.
    pub async fn shutdown(&self) {
        let resources: Vec<String> = {
            let held = self.held.lock().await;
            held.keys().cloned().collect()
        };
        for resource in resources {
            if let Err(err) = self.release(&resource).await {
                warn!(resource = %resource, error = %err, "failed to release lock during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot::HotTierConfig;

    /// Config pointing nowhere so the client starts degraded and every
    /// operation runs against the in-process fallback.
    fn offline_config() -> HotTierConfig {
        HotTierConfig {
            master_host: "127.0.0.1".to_string(),
            master_port: 1,
            connect_timeout: Duration::from_millis(50),
            max_retries: 1,
            ..HotTierConfig::default()
        }
    }

    async fn offline_service() -> Arc<LockService> {
        let hot = Arc::new(HotTier::connect(offline_config()).await.expect("client"));
        assert!(hot.is_degraded());
        LockService::new(hot, "instance-a".to_string())
    }

    #[tokio::test]
    async fn tokens_carry_instance_and_nonce() {
        let service = offline_service().await;
        let token = service.new_token();
        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "instance-a");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
    }

    #[tokio::test]
    async fn acquire_release_round_trip() {
        let service = offline_service().await;
        service.acquire("res", Duration::from_secs(30), 0).await.expect("acquire");
        assert!(service.is_lock_owner("res").await.expect("owner check"));
        assert_eq!(service.active_count().await, 1);
        assert!(service.release("res").await.expect("release"));
        assert_eq!(service.active_count().await, 0);
        assert!(!service.release("res").await.expect("double release"));
    }

    #[tokio::test]
    async fn contended_resource_is_rejected_after_retries() {
        let service = offline_service().await;
        service.acquire("res", Duration::from_secs(30), 0).await.expect("first holder");

        let other = LockService::new(Arc::clone(&service.hot), "instance-b".to_string());
        let result = other.acquire("res", Duration::from_secs(30), 1).await;
        assert!(matches!(result, Err(LockError::Contention { .. })));
    }

    #[tokio::test]
    async fn cleanup_drops_records_for_expired_keys() {
        let service = offline_service().await;
        service.acquire("gone", Duration::from_millis(1), 0).await.expect("acquire");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let dropped = service.cleanup_expired_locks().await.expect("cleanup");
        assert_eq!(dropped, 1);
        assert_eq!(service.active_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let service = offline_service().await;
        service.acquire("a", Duration::from_secs(30), 0).await.expect("a");
        service.acquire("b", Duration::from_secs(30), 0).await.expect("b");
        service.shutdown().await;
        assert_eq!(service.active_count().await, 0);
    }
}
