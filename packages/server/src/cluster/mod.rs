//! Cross-instance coordination: pub/sub event bus, peer pool and
//! durable-tier replication.

mod event_bus;
mod peers;
mod replication;

pub use event_bus::{CrossInstanceBus, InvalidationSink, channels};
pub use peers::PeerPool;
pub use replication::{ReplicationService, ReplicationStats, resolve_conflict};

use serde_json::Value;

use parlay_entity::SyncOperation;

/// Commands the cache services hand to the bus. The caches are constructed
/// before the bus, so they publish through a channel the bus drains once it
/// is up.
#[derive(Debug, Clone)]
pub enum BusCommand {
    MessageSync { operation: SyncOperation, payload: Value },
    CacheInvalidation { keys: Vec<String> },
}
