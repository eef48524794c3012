//! Durable-tier replication: replays local change-stream events into peer
//! durable tiers with last-write-wins conflict resolution.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::StreamExt;
use mongodb::Database;
use mongodb::bson::{Document, doc};
use mongodb::change_stream::event::OperationType;
use mongodb::options::FullDocumentType;
use serde::Serialize;
use tracing::{debug, info, warn};

use parlay_storage::repository::{MessageRepository, RepositoryError};

use crate::config::ServerConfig;

const REPLICATED_COLLECTIONS: [&str; 3] = ["messages", "users", "rooms"];
const INITIAL_SYNC_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Which side of a conflict wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Last-write-wins on `updatedAt || createdAt || timestamp`; ties broken by
/// lexicographic `lastModifiedBy` so two instances never oscillate.
pub fn resolve_conflict(local: &Document, remote: &Document) -> Winner {
    let local_clock = logical_clock(local);
    let remote_clock = logical_clock(remote);
    if remote_clock != local_clock {
        return if remote_clock > local_clock { Winner::Remote } else { Winner::Local };
    }
    let local_by = local.get_str("lastModifiedBy").unwrap_or_default();
    let remote_by = remote.get_str("lastModifiedBy").unwrap_or_default();
    if remote_by > local_by { Winner::Remote } else { Winner::Local }
}

fn logical_clock(doc: &Document) -> i64 {
    for field in ["updatedAt", "createdAt", "timestamp"] {
        if let Ok(value) = doc.get_i64(field) {
            return value;
        }
        if let Ok(value) = doc.get_i32(field) {
            return value as i64;
        }
    }
    0
}

#[derive(Debug, Default)]
struct StatsInner {
    replicated: AtomicU64,
    conflicts_resolved: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicationStats {
    pub enabled: bool,
    #[serde(rename = "peerCount")]
    pub peer_count: usize,
    pub replicated: u64,
    #[serde(rename = "conflictsResolved")]
    pub conflicts_resolved: u64,
    pub errors: u64,
}

/// Watches the local durable tier's change streams and upserts foreign-
/// origin documents into every peer durable tier.
pub struct ReplicationService {
    instance_id: String,
    local: Database,
    messages: MessageRepository,
    peers: Vec<Database>,
    stats: StatsInner,
}

impl ReplicationService {
    /// Opens secondary connections to each peer durable tier, derived from
    /// the peer HTTP URLs. Unreachable peers are skipped with a warning.
    pub async fn init(
        config: &ServerConfig,
        local: Database,
        messages: MessageRepository,
    ) -> Arc<Self> {
        let mut peers = Vec::new();
        for peer_url in &config.peer_instances {
            let Some(uri) = ServerConfig::peer_mongo_uri(peer_url) else {
                warn!(peer = %peer_url, "cannot derive a durable-tier URI for peer");
                continue;
            };
            match parlay_storage::repository::connect(&uri).await {
                Ok(db) => {
                    info!(peer = %peer_url, "peer durable tier connected");
                    peers.push(db);
                },
                Err(err) => {
                    warn!(peer = %peer_url, error = %err, "peer durable tier unreachable");
                },
            }
        }
        Arc::new(Self {
            instance_id: config.instance_id.clone(),
            local,
            messages,
            peers,
            stats: StatsInner::default(),
        })
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            enabled: true,
            peer_count: self.peers.len(),
            replicated: self.stats.replicated.load(Ordering::Relaxed),
            conflicts_resolved: self.stats.conflicts_resolved.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    /// Initial sync plus one change-stream watcher per collection.
    pub async fn start(self: &Arc<Self>) {
        if let Err(err) = self.initial_sync().await {
            warn!(error = %err, "replication initial sync failed");
        }
        for collection in REPLICATED_COLLECTIONS {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                service.watch_collection(collection).await;
            });
        }
        info!(peers = self.peers.len(), "durable-tier replication started");
    }

    /// Replays the last 24 hours of foreign-origin messages.
    async fn initial_sync(&self) -> Result<(), RepositoryError> {
        let since = Utc::now().timestamp_millis() - INITIAL_SYNC_WINDOW_MS;
        let foreign = self.messages.foreign_since(&self.instance_id, since).await?;
        let count = foreign.len();
        for message in foreign {
            match mongodb::bson::to_document(&message) {
                Ok(doc) => self.replicate_to_all_peers("messages", &doc).await,
                Err(err) => warn!(error = %err, "unencodable message skipped in initial sync"),
            }
        }
        info!(count, "replication initial sync completed");
        Ok(())
    }

    async fn watch_collection(&self, collection_name: &'static str) {
        let collection = self.local.collection::<Document>(collection_name);
        let pipeline = vec![doc! {
            "$match": {
                "operationType": { "$in": ["insert", "update", "replace", "delete"] },
                "fullDocument.instanceId": { "$ne": &self.instance_id },
            }
        }];
        let stream = collection
            .watch()
            .pipeline(pipeline)
            .full_document(FullDocumentType::UpdateLookup)
            .await;
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(collection = collection_name, error = %err, "change stream unavailable");
                return;
            },
        };
        info!(collection = collection_name, "watching change stream");
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if event.operation_type == OperationType::Delete {
                        if let Some(key) = event.document_key {
                            self.delete_from_all_peers(collection_name, &key).await;
                        }
                        continue;
                    }
                    if let Some(doc) = event.full_document {
                        self.replicate_to_all_peers(collection_name, &doc).await;
                    }
                },
                Err(err) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(collection = collection_name, error = %err, "change stream error");
                },
            }
        }
        warn!(collection = collection_name, "change stream ended");
    }

    /// Upserts the document into every peer durable tier, annotated with
    /// replication metadata, unless the peer's copy wins the conflict.
    pub async fn replicate_to_all_peers(&self, collection_name: &str, document: &Document) {
        let Ok(id) = document.get_str("_id") else {
            debug!(collection = collection_name, "document without _id skipped");
            return;
        };
        let mut annotated = document.clone();
        let now = Utc::now().timestamp_millis();
        annotated.insert("replicatedFrom", &self.instance_id);
        annotated.insert("replicatedAt", now);
        annotated.insert("lastModifiedBy", &self.instance_id);
        annotated.insert("lastModifiedAt", now);

        for peer in &self.peers {
            let collection = peer.collection::<Document>(collection_name);
            let existing = match collection.find_one(doc! { "_id": id }).await {
                Ok(existing) => existing,
                Err(err) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %err, "peer lookup failed during replication");
                    continue;
                },
            };
            if let Some(existing) = existing {
                self.stats.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
                if resolve_conflict(&existing, &annotated) == Winner::Local {
                    // The peer's copy is newer; leave it.
                    continue;
                }
            }
            match collection
                .replace_one(doc! { "_id": id }, &annotated)
                .upsert(true)
                .await
            {
                Ok(_) => {
                    self.stats.replicated.fetch_add(1, Ordering::Relaxed);
                },
                Err(err) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %err, "peer upsert failed during replication");
                },
            }
        }
    }

    /// Overwrites the local copy when a remote document wins a conflict.
    pub async fn update_local_document(&self, collection_name: &str, document: &Document) {
        let Ok(id) = document.get_str("_id") else { return };
        let collection = self.local.collection::<Document>(collection_name);
        if let Err(err) = collection
            .replace_one(doc! { "_id": id }, document)
            .upsert(true)
            .await
        {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, "local overwrite failed");
        }
    }

    pub async fn apply_remote(&self, collection_name: &str, remote: &Document) {
        let Ok(id) = remote.get_str("_id") else { return };
        let collection = self.local.collection::<Document>(collection_name);
        let local = match collection.find_one(doc! { "_id": id }).await {
            Ok(local) => local,
            Err(err) => {
                warn!(error = %err, "local lookup failed while applying remote document");
                return;
            },
        };
        match local {
            Some(local) => match resolve_conflict(&local, remote) {
                Winner::Remote => self.update_local_document(collection_name, remote).await,
                Winner::Local => self.replicate_to_all_peers(collection_name, &local).await,
            },
            None => self.update_local_document(collection_name, remote).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(clock_field: &str, value: i64, modified_by: &str) -> Document {
        doc! { "_id": "m1", clock_field: value, "lastModifiedBy": modified_by }
    }

    #[test]
    fn newer_remote_wins() {
        let local = doc_with("updatedAt", 100, "a");
        let remote = doc_with("updatedAt", 200, "b");
        assert_eq!(resolve_conflict(&local, &remote), Winner::Remote);
        assert_eq!(resolve_conflict(&remote, &local), Winner::Local);
    }

    #[test]
    fn created_at_is_the_fallback_clock() {
        let local = doc! { "_id": "m1", "createdAt": 50i64 };
        let remote = doc! { "_id": "m1", "updatedAt": 80i64 };
        assert_eq!(resolve_conflict(&local, &remote), Winner::Remote);
    }

    #[test]
    fn ties_break_on_instance_id() {
        let local = doc_with("updatedAt", 100, "instance-a");
        let remote = doc_with("updatedAt", 100, "instance-b");
        assert_eq!(resolve_conflict(&local, &remote), Winner::Remote);
        // Symmetric view on the other instance agrees, so no oscillation.
        assert_eq!(resolve_conflict(&remote, &local), Winner::Local);
    }

    #[test]
    fn missing_clocks_favor_local() {
        let local = doc! { "_id": "m1" };
        let remote = doc! { "_id": "m1" };
        assert_eq!(resolve_conflict(&local, &remote), Winner::Local);
    }
}
