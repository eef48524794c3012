use std::env;
use std::time::Duration;

/// Hot-tier connection settings, read from the `REDIS_*` environment
/// surface.
#[derive(Debug, Clone)]
pub struct HotTierConfig {
    pub cluster_enabled: bool,
    pub master_host: String,
    pub master_port: u16,
    pub replica_host: String,
    pub replica_port: u16,
    pub connect_timeout: Duration,
    /// Consecutive connectivity failures tolerated before the client
    /// degrades to the in-process fallback.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// How long the client stays degraded before probing the real engine
    /// again.
    pub failover_timeout: Duration,
}

impl Default for HotTierConfig {
    fn default() -> Self {
        Self {
            cluster_enabled: false,
            master_host: "127.0.0.1".to_string(),
            master_port: 6379,
            replica_host: "127.0.0.1".to_string(),
            replica_port: 6380,
            connect_timeout: Duration::from_secs(5),
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
            failover_timeout: Duration::from_secs(10),
        }
    }
}

impl HotTierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cluster_enabled: env_bool("REDIS_CLUSTER_ENABLED", defaults.cluster_enabled),
            master_host: env::var("REDIS_MASTER_HOST").unwrap_or(defaults.master_host),
            master_port: env_parse("REDIS_MASTER_PORT", defaults.master_port),
            replica_host: env::var("REDIS_SLAVE_HOST").unwrap_or(defaults.replica_host),
            replica_port: env_parse("REDIS_SLAVE_PORT", defaults.replica_port),
            connect_timeout: Duration::from_millis(env_parse(
                "REDIS_CONNECT_TIMEOUT",
                defaults.connect_timeout.as_millis() as u64,
            )),
            max_retries: env_parse("REDIS_MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_millis(env_parse(
                "REDIS_RETRY_DELAY",
                defaults.retry_delay.as_millis() as u64,
            )),
            failover_timeout: Duration::from_millis(env_parse(
                "REDIS_FAILOVER_TIMEOUT",
                defaults.failover_timeout.as_millis() as u64,
            )),
        }
    }

    /// Config pointing at a peer instance's hot tier, used by the discovery
    /// handler (master at `host:port`, replica convention at `port+10000`).
    pub fn for_peer(endpoint: &str) -> Option<Self> {
        let (host, port) = endpoint.split_once(':')?;
        let port: u16 = port.parse().ok()?;
        Some(Self {
            cluster_enabled: false,
            master_host: host.to_string(),
            master_port: port,
            replica_host: host.to_string(),
            replica_port: port.saturating_add(10_000),
            ..Self::default()
        })
    }

    pub fn master_url(&self) -> String {
        format!("redis://{}:{}/", self.master_host, self.master_port)
    }

    pub fn replica_url(&self) -> String {
        format!("redis://{}:{}/", self.replica_host, self.replica_port)
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_config_derives_replica_port() {
        let config = HotTierConfig::for_peer("10.0.0.5:6379").expect("parse");
        assert_eq!(config.master_host, "10.0.0.5");
        assert_eq!(config.master_port, 6379);
        assert_eq!(config.replica_port, 16379);
    }

    #[test]
    fn malformed_peer_endpoint_is_rejected() {
        assert!(HotTierConfig::for_peer("nonsense").is_none());
        assert!(HotTierConfig::for_peer("host:notaport").is_none());
    }
}
