//! Pool of hot-tier connections to discovered peer instances.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use parlay_entity::PeerDescriptor;
use parlay_storage::hot::{HotTier, HotTierConfig};

struct PeerEntry {
    descriptor: PeerDescriptor,
    #[allow(dead_code)]
    hot: Arc<HotTier>,
}

/// endpoint → peer connection. Entries are added by the discovery handler
/// and refreshed by health events.
#[derive(Default)]
pub struct PeerPool {
    peers: RwLock<HashMap<String, PeerEntry>>,
}

impl PeerPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn contains(&self, endpoint: &str) -> bool {
        self.peers.read().await.contains_key(endpoint)
    }

    /// Opens a hot-tier connection to the peer (master at `host:port`,
    /// replica at `port+10000`) and records the descriptor.
    pub async fn add_peer(
        &self,
        instance_id: &str,
        endpoint: &str,
        http_base_url: Option<String>,
    ) -> bool {
        if self.contains(endpoint).await {
            self.touch(instance_id).await;
            return false;
        }
        let Some(config) = HotTierConfig::for_peer(endpoint) else {
            warn!(endpoint, "ignoring discovery event with malformed endpoint");
            return false;
        };
        let hot = match HotTier::connect(config).await {
            Ok(hot) => Arc::new(hot),
            Err(err) => {
                warn!(endpoint, error = %err, "could not open peer hot-tier connection");
                return false;
            },
        };
        let descriptor = PeerDescriptor {
            instance_id: instance_id.to_string(),
            hot_tier_endpoint: endpoint.to_string(),
            http_base_url,
            last_seen: Utc::now().timestamp_millis(),
        };
        info!(instance_id, endpoint, "peer connected");
        self.peers
            .write()
            .await
            .insert(endpoint.to_string(), PeerEntry { descriptor, hot });
        true
    }

    /// Refreshes last-seen for a peer identified by instance id.
    pub async fn touch(&self, instance_id: &str) {
        let mut peers = self.peers.write().await;
        for entry in peers.values_mut() {
            if entry.descriptor.instance_id == instance_id {
                entry.descriptor.last_seen = Utc::now().timestamp_millis();
            }
        }
    }

    pub async fn descriptors(&self) -> Vec<PeerDescriptor> {
        self.peers.read().await.values().map(|entry| entry.descriptor.clone()).collect()
    }

    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }
}
