use thiserror::Error;

/// Failure categories surfaced by the hot-tier client. In degraded mode no
/// operation returns an error; callers only see these while the real engine
/// is reachable.
#[derive(Debug, Error)]
pub enum HotTierError {
    #[error("hot tier connectivity: {0}")]
    Connectivity(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("command unsupported in this mode: {0}")]
    CommandUnsupported(&'static str),

    #[error("index already exists: {0}")]
    IndexExists(String),

    #[error("lock contention on {0}")]
    LockContention(String),

    #[error("malformed reply for {command}: {detail}")]
    Protocol { command: &'static str, detail: String },

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HotTierError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, HotTierError::Connectivity(_))
    }

    pub(crate) fn from_redis(err: redis::RedisError) -> Self {
        if err.to_string().contains("Index already exists") {
            return HotTierError::IndexExists(err.to_string());
        }
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            HotTierError::Connectivity(err.to_string())
        } else {
            HotTierError::Protocol { command: "redis", detail: err.to_string() }
        }
    }
}
