use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use parlay_storage::hot::HotTierConfig;

static SERVER_CONFIG: OnceLock<ServerConfig> = OnceLock::new();

/// External object store settings; the store itself issues presigned URLs,
/// the core only forwards the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    /// Seconds a presigned URL stays valid.
    pub presigned_url_expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub instance_id: String,
    pub port: u16,
    pub environment: String,
    pub jwt_secret: String,
    pub mongo_uri: String,
    pub mongo_replication_enabled: bool,
    pub cross_replication_enabled: bool,
    /// host:port hot-tier endpoints of peer instances.
    pub redis_peer_instances: Vec<String>,
    /// HTTP base URLs of peer instances.
    pub peer_instances: Vec<String>,
    pub health_check_interval: Duration,
    pub object_store: ObjectStoreConfig,
    #[serde(skip)]
    pub hot_tier: HotTierConfig,
}

impl ServerConfig {
    pub fn init() -> &'static ServerConfig {
        SERVER_CONFIG.get_or_init(Self::from_env)
    }

    pub fn get() -> Option<&'static ServerConfig> {
        SERVER_CONFIG.get()
    }

    pub fn from_env() -> Self {
        let instance_id = env::var("INSTANCE_ID").unwrap_or_else(|_| {
            warn!("INSTANCE_ID not set, deriving one from the process id");
            format!("instance-{}", std::process::id())
        });
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using a development-only secret");
            "dev-secret".to_string()
        });
        Self {
            instance_id,
            port: env_parse("PORT", 5000),
            environment: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
            jwt_secret,
            mongo_uri: env::var("MONGO_URI")
                .unwrap_or_else(|_| "mongodb://127.0.0.1:27017/parlay".to_string()),
            mongo_replication_enabled: env_bool("MONGO_REPLICATION_ENABLED", false),
            cross_replication_enabled: env_bool("REDIS_CROSS_REPLICATION_ENABLED", false),
            redis_peer_instances: env_list("REDIS_PEER_INSTANCES"),
            peer_instances: env_list("PEER_INSTANCES"),
            health_check_interval: Duration::from_millis(
                env_parse("HEALTH_CHECK_INTERVAL", 10_000u64),
            ),
            object_store: ObjectStoreConfig {
                access_key_id: env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
                region: env::var("AWS_REGION").unwrap_or_else(|_| "ap-northeast-2".to_string()),
                bucket: env::var("S3_BUCKET_NAME").unwrap_or_default(),
                presigned_url_expiry: env_parse("S3_PRESIGNED_URL_EXPIRY", 300u64),
            },
            hot_tier: HotTierConfig::from_env(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// `http://host:port` of this instance, handed out during discovery.
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.hot_tier.master_host, self.port)
    }

    /// Peer durable-tier URI derived from the peer HTTP URL by the port
    /// convention 5001↔27017, 5002↔27018, 5003↔27019.
    pub fn peer_mongo_uri(peer_http_url: &str) -> Option<String> {
        let trimmed = peer_http_url.trim_end_matches('/');
        let (host_part, port) = trimmed.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        let mongo_port = 27017u16.checked_add(port.checked_sub(5001)?)?;
        let host = host_part
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        Some(format!("mongodb://{host}:{mongo_port}/parlay"))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_mongo_uri_follows_the_port_convention() {
        assert_eq!(
            ServerConfig::peer_mongo_uri("http://10.0.0.2:5001"),
            Some("mongodb://10.0.0.2:27017/parlay".to_string())
        );
        assert_eq!(
            ServerConfig::peer_mongo_uri("http://10.0.0.3:5003/"),
            Some("mongodb://10.0.0.3:27019/parlay".to_string())
        );
    }

    #[test]
    fn peer_mongo_uri_rejects_out_of_range_ports() {
        assert_eq!(ServerConfig::peer_mongo_uri("http://10.0.0.2:5000"), None);
        assert_eq!(ServerConfig::peer_mongo_uri("not a url"), None);
    }
}
