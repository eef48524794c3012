use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parlay_storage::hot::HotTier;
use parlay_storage::lock::LockService;
use parlay_storage::queue::SyncQueue;
use parlay_storage::repository::{MessageRepository, RoomRepository};

use crate::ai::AiProvider;
use crate::auth::SessionService;
use crate::cache::{MessageCacheService, RoomCacheService};
use crate::cluster::{CrossInstanceBus, PeerPool, ReplicationService};
use crate::config::ServerConfig;
use crate::files::{ActiveUploads, ObjectStoreClient};
use crate::realtime::{Hub, StreamingSessions};
use crate::sync::SyncWorker;

/// Shared handles for every request and socket. Construction happens in
/// `main` in the fixed order hot tier → sync queue → locks → cache services
/// → bus → hub; the only late binding is the bus's invalidation callback
/// into the hub.
#[derive(Clone)]
pub struct AppState {
    pub config: &'static ServerConfig,
    pub hot: Arc<HotTier>,
    pub queue: Arc<SyncQueue>,
    pub locks: Arc<LockService>,
    pub rooms_repo: RoomRepository,
    pub messages_repo: MessageRepository,
    pub room_cache: Arc<RoomCacheService>,
    pub message_cache: Arc<MessageCacheService>,
    pub bus: Arc<CrossInstanceBus>,
    pub peers: Arc<PeerPool>,
    pub replication: Option<Arc<ReplicationService>>,
    pub hub: Arc<Hub>,
    pub streaming: Arc<StreamingSessions>,
    pub sync_worker: Arc<SyncWorker>,
    pub session_service: Arc<SessionService>,
    pub ai: Arc<dyn AiProvider>,
    pub object_store: Arc<ObjectStoreClient>,
    pub active_uploads: Arc<ActiveUploads>,
    pub http_client: Arc<reqwest::Client>,
    pub start_time: Instant,
    draining: Arc<AtomicBool>,
    reject_new_connections: Arc<AtomicBool>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'static ServerConfig,
        hot: Arc<HotTier>,
        queue: Arc<SyncQueue>,
        locks: Arc<LockService>,
        rooms_repo: RoomRepository,
        messages_repo: MessageRepository,
        room_cache: Arc<RoomCacheService>,
        message_cache: Arc<MessageCacheService>,
        bus: Arc<CrossInstanceBus>,
        peers: Arc<PeerPool>,
        replication: Option<Arc<ReplicationService>>,
        hub: Arc<Hub>,
        streaming: Arc<StreamingSessions>,
        sync_worker: Arc<SyncWorker>,
        session_service: Arc<SessionService>,
        ai: Arc<dyn AiProvider>,
        object_store: Arc<ObjectStoreClient>,
        active_uploads: Arc<ActiveUploads>,
        http_client: Arc<reqwest::Client>,
    ) -> Self {
        Self {
            config,
            hot,
            queue,
            locks,
            rooms_repo,
            messages_repo,
            room_cache,
            message_cache,
            bus,
            peers,
            replication,
            hub,
            streaming,
            sync_worker,
            session_service,
            ai,
            object_store,
            active_uploads,
            http_client,
            start_time: Instant::now(),
            draining: Arc::new(AtomicBool::new(false)),
            reject_new_connections: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn rejects_new_connections(&self) -> bool {
        self.reject_new_connections.load(Ordering::Relaxed)
    }

    /// Flips drain mode: no new connections, existing traffic continues.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Relaxed);
        self.reject_new_connections.store(true, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
