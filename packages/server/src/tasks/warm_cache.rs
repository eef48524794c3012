use tracing::warn;

use crate::state::AppState;

/// Startup warm-up: all rooms into the hot tier, then recent messages for
/// every room active in the last 24 hours. Runs detached so boot never
/// blocks on it.
pub async fn warm_caches(state: AppState) {
    if let Err(err) = state.room_cache.warm_cache().await {
        warn!(error = %err, "room cache warm-up failed");
    }
    if let Err(err) = state.message_cache.warm_all_active_rooms().await {
        warn!(error = %err, "message cache warm-up failed");
    }
}
