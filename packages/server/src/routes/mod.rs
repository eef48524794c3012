//! HTTP surface. All heavy lifting lives in the cache services; handlers
//! stay thin.

mod files;
mod health;
mod messages;
mod rooms;
mod status;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};

use crate::auth::require_auth_middleware;
use crate::middleware::{
    RateLimitService, create_cors_layer, message_rate_limit_middleware,
    room_rate_limit_middleware,
};
use crate::realtime::websocket_handler;
use crate::state::AppState;

pub fn build_router(state: AppState, rate_limits: Arc<RateLimitService>) -> Router {
    let room_routes = Router::new()
        .route("/", get(rooms::list_rooms).post(rooms::create_room))
        .route("/{room_id}", get(rooms::get_room).delete(rooms::delete_room))
        .route("/{room_id}/join", post(rooms::join_room))
        .layer(from_fn_with_state(rate_limits.clone(), room_rate_limit_middleware));

    let message_routes = Router::new()
        .route("/{room_id}/messages", get(messages::get_room_messages))
        .layer(from_fn_with_state(rate_limits, message_rate_limit_middleware));

    let file_routes = Router::new()
        .route("/presigned-url", post(files::presigned_url))
        .route("/upload-complete", post(files::upload_complete))
        .route("/s3-url/download/{filename}", get(files::download_url))
        .route("/s3-url/view/{filename}", get(files::view_url));

    let authed = Router::new()
        .nest("/api/rooms", room_routes.merge(message_routes))
        .nest("/api/files", file_routes)
        .layer(from_fn_with_state(state.clone(), require_auth_middleware));

    let instance_status = Router::new()
        .route("/health", get(status::aggregate_health))
        .route("/detailed", get(status::detailed))
        .route("/load-metrics", get(status::load_metrics))
        .route("/drain", post(status::drain))
        .route("/peers", get(status::peers));

    Router::new()
        .route("/health", get(health::liveness))
        .route("/ws", get(websocket_handler))
        .nest("/api/instance-status", instance_status)
        .merge(authed)
        .layer(create_cors_layer())
        .with_state(state)
}
