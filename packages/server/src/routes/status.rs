//! Per-instance health, drain mode, load metrics and peer probing.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::json;
use tracing::info;

use crate::monitoring::LoadMonitor;
use crate::state::AppState;

const PEER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_HEALTHY_PERCENT: f64 = 90.0;

static LOAD_MONITOR: Lazy<LoadMonitor> = Lazy::new(LoadMonitor::new);

/// GET /api/instance-status/health — 200 when the hot tier answers PING,
/// the durable tier responds and memory is below the ceiling.
pub async fn aggregate_health(State(state): State<AppState>) -> Response {
    let hot_ok = state.hot.ping().await;
    let durable_ok = state
        .messages_repo
        .get_by_id("health_check_probe")
        .await
        .is_ok();
    let metrics = LOAD_MONITOR.sample(
        state.uptime_seconds(),
        state.hub.socket_count(),
        state.locks.active_count().await,
        state.peers.count().await,
        state.bus.is_initialized(),
    );
    let memory_ok = metrics.memory_percent < MEMORY_HEALTHY_PERCENT;

    let healthy = hot_ok && durable_ok && memory_ok;
    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "timestamp": Utc::now().timestamp_millis(),
        "checks": {
            "hotTier": { "ok": hot_ok, "degraded": state.hot.status().degraded },
            "durableTier": { "ok": durable_ok },
            "memory": { "ok": memory_ok, "percent": metrics.memory_percent },
        },
    });
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

/// GET /api/instance-status/detailed — peer connectivity, replication and
/// sync-pipeline internals.
pub async fn detailed(State(state): State<AppState>) -> Response {
    let replication = state.replication.as_ref().map(|r| r.stats());
    let dead_letter_depth = state.queue.dead_letter_depth().await.unwrap_or(0);
    let queue_depth = state.queue.depth().await.unwrap_or(0);
    let dead_letters = state.queue.dead_letters(10).await.unwrap_or_default();

    let body = json!({
        "instanceId": state.config.instance_id,
        "timestamp": Utc::now().timestamp_millis(),
        "hotTier": state.hot.status(),
        "crossInstance": {
            "initialized": state.bus.is_initialized(),
            "peers": state.peers.descriptors().await,
        },
        "replication": replication,
        "syncWorker": state.sync_worker.stats(),
        "syncQueue": {
            "depth": queue_depth,
            "deadLetterDepth": dead_letter_depth,
            "recentDeadLetters": dead_letters,
        },
        "activeLocks": state.locks.active_locks().await,
        "activeUploads": state.active_uploads.count().await,
        "activeStreams": state.streaming.count().await,
        "draining": state.is_draining(),
    });
    Json(body).into_response()
}

/// GET /api/instance-status/load-metrics — the load balancer's feed.
pub async fn load_metrics(State(state): State<AppState>) -> Response {
    let metrics = LOAD_MONITOR.sample(
        state.uptime_seconds(),
        state.hub.socket_count(),
        state.locks.active_count().await,
        state.peers.count().await,
        state.bus.is_initialized(),
    );
    Json(json!({ "instanceId": state.config.instance_id, "metrics": metrics })).into_response()
}

/// POST /api/instance-status/drain — stop accepting new connections and
/// estimate how long existing ones need.
pub async fn drain(State(state): State<AppState>) -> Response {
    state.begin_drain();
    let active = state.hub.socket_count();
    // Rough estimate: a second per active connection, at least five.
    let estimated_seconds = (active as u64).max(5);
    info!(active, estimated_seconds, "drain mode enabled");
    Json(json!({
        "success": true,
        "draining": true,
        "activeConnections": active,
        "estimatedDrainSeconds": estimated_seconds,
    }))
    .into_response()
}

/// GET /api/instance-status/peers — probes each configured peer's health
/// endpoint.
pub async fn peers(State(state): State<AppState>) -> Response {
    let mut results = Vec::new();
    for peer in &state.config.peer_instances {
        let url = format!("{}/health", peer.trim_end_matches('/'));
        let started = std::time::Instant::now();
        let outcome = state
            .http_client
            .get(&url)
            .timeout(PEER_PROBE_TIMEOUT)
            .send()
            .await;
        let (reachable, status) = match outcome {
            Ok(response) => (response.status().is_success(), response.status().as_u16()),
            Err(_) => (false, 0),
        };
        results.push(json!({
            "peer": peer,
            "reachable": reachable,
            "status": status,
            "latencyMs": started.elapsed().as_millis() as u64,
        }));
    }
    Json(json!({
        "instanceId": state.config.instance_id,
        "discovered": state.peers.descriptors().await,
        "probes": results,
    }))
    .into_response()
}
