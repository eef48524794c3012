use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error};

use parlay_storage::lock::LockService;

/// Background task dropping local lock records whose keys expired in the
/// hot tier. Runs every 60 seconds.
pub async fn start_lock_cleanup_task(locks: Arc<LockService>) {
    let mut ticker = interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        match locks.cleanup_expired_locks().await {
            Ok(dropped) => {
                if dropped > 0 {
                    debug!(dropped, "expired lock records cleaned up");
                }
            },
            Err(err) => error!(error = %err, "lock cleanup failed"),
        }
    }
}
