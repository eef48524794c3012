use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use parlay_storage::hot::HotTier;
use parlay_storage::lock::LockService;
use parlay_storage::queue::SyncQueue;
use parlay_storage::repository::{
    MessageRepository, RoomRepository, SessionRepository, UserRepository,
};

use parlay_server::ai::HttpAiClient;
use parlay_server::auth::SessionService;
use parlay_server::cache::{self, MessageCacheService, RoomCacheService};
use parlay_server::cluster::{CrossInstanceBus, PeerPool, ReplicationService};
use parlay_server::config::ServerConfig;
use parlay_server::middleware::RateLimitService;
use parlay_server::realtime::{Hub, StreamingSessions};
use parlay_server::routes::build_router;
use parlay_server::state::AppState;
use parlay_server::sync::SyncWorker;
use parlay_server::tasks;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
const ROOM_ENDPOINT_RPM: u32 = 60;
const MESSAGE_ENDPOINT_RPM: u32 = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Uncaught panics anywhere take the process down through the graceful
    // path rather than limping on with torn state.
    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "fatal: uncaught panic");
    }));

    let config = ServerConfig::init();
    info!(instance_id = %config.instance_id, port = config.port, "starting parlay");

    // Durable tier.
    let db = parlay_storage::repository::connect(&config.mongo_uri)
        .await
        .map_err(|err| format!("durable tier unavailable at {}: {err}", config.mongo_uri))?;
    let rooms_repo = RoomRepository::new(db.clone());
    let messages_repo = MessageRepository::new(db.clone());
    let users_repo = UserRepository::new(db.clone());
    let sessions_repo = SessionRepository::new(db.clone());

    // Fixed init order: hot tier → sync queue → locks → cache services →
    // cross-instance bus → hub.
    let hot = Arc::new(HotTier::connect(config.hot_tier.clone()).await?);
    let queue = Arc::new(SyncQueue::new(Arc::clone(&hot)));
    let locks = LockService::new(Arc::clone(&hot), config.instance_id.clone());

    if let Err(err) = cache::ensure_indices(&hot).await {
        warn!(error = %err, "secondary indices unavailable, listings will fall back");
    }

    let (bus_tx, bus_rx) = mpsc::unbounded_channel();
    let room_cache = Arc::new(RoomCacheService::new(Arc::clone(&hot), rooms_repo.clone()));
    let message_cache = Arc::new(MessageCacheService::new(
        Arc::clone(&hot),
        messages_repo.clone(),
        Arc::clone(&queue),
        Arc::clone(&locks),
        bus_tx,
        config.instance_id.clone(),
    ));

    let peers = PeerPool::new();
    let own_endpoint = format!(
        "{}:{}",
        config.hot_tier.master_host, config.hot_tier.master_port
    );
    let bus = CrossInstanceBus::new(
        Arc::clone(&hot),
        Arc::clone(&peers),
        config.instance_id.clone(),
        own_endpoint,
        config.port,
        config.health_check_interval,
    );
    if config.cross_replication_enabled {
        bus.start(bus_rx).await;
        for endpoint in &config.redis_peer_instances {
            peers.add_peer("configured", endpoint, None).await;
        }
    } else {
        info!("cross-instance bus disabled");
        drop(bus_rx);
    }

    let hub = Hub::new();
    bus.set_invalidation_sink(hub.clone());
    let streaming = StreamingSessions::new();

    let replication = if config.mongo_replication_enabled {
        let service = ReplicationService::init(config, db.clone(), messages_repo.clone()).await;
        service.start().await;
        Some(service)
    } else {
        None
    };

    let sync_worker = SyncWorker::new(Arc::clone(&queue), messages_repo.clone());
    tokio::spawn(Arc::clone(&sync_worker).run());

    let http_client = Arc::new(reqwest::Client::new());
    let session_service = Arc::new(SessionService::new(
        &config.jwt_secret,
        users_repo,
        sessions_repo,
    ));
    let ai = Arc::new(HttpAiClient::new(
        Arc::clone(&http_client),
        std::env::var("AI_SERVICE_URL").unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),
    ));
    let object_store = Arc::new(parlay_server::files::ObjectStoreClient::new(
        Arc::clone(&http_client),
        config.object_store.clone(),
    ));
    let active_uploads = parlay_server::files::ActiveUploads::new(Duration::from_secs(
        config.object_store.presigned_url_expiry,
    ));

    let state = AppState::new(
        config,
        hot,
        queue,
        Arc::clone(&locks),
        rooms_repo,
        messages_repo,
        room_cache,
        message_cache,
        bus,
        peers,
        replication,
        hub,
        streaming,
        Arc::clone(&sync_worker),
        session_service,
        ai,
        object_store,
        active_uploads,
        http_client,
    );

    tokio::spawn(tasks::warm_caches(state.clone()));
    tokio::spawn(tasks::start_lock_cleanup_task(Arc::clone(&locks)));

    let rate_limits = Arc::new(
        RateLimitService::new(ROOM_ENDPOINT_RPM, MESSAGE_ENDPOINT_RPM)
            .map_err(|err| format!("rate limiter misconfigured: {err}"))?,
    );
    let app = build_router(state.clone(), rate_limits);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| format!("could not bind {addr}: {err}"))?;
    info!(%addr, "listening");

    let shutdown_state = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_signal().await;
        shutdown_state.begin_drain();
        info!("shutdown signal received, draining");
    })
    .await
    .map_err(|err| format!("server error: {err}"))?;

    shutdown(&state).await;
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            },
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Ordered teardown mirroring the init order, bounded by a hard deadline.
async fn shutdown(state: &AppState) {
    let teardown = async {
        state.sync_worker.stop();
        state.locks.shutdown().await;
        info!("shutdown complete");
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, teardown).await.is_err() {
        error!("shutdown deadline exceeded, forcing exit");
        std::process::exit(1);
    }
}
