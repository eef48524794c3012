use serde::{Deserialize, Serialize};

/// Another instance of this backend discovered over the cross-instance bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerDescriptor {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    /// host:port of the peer's hot-tier master.
    #[serde(rename = "instanceEndpoint")]
    pub hot_tier_endpoint: String,
    #[serde(rename = "httpBaseUrl", skip_serializing_if = "Option::is_none")]
    pub http_base_url: Option<String>,
    /// Epoch milliseconds of the last event seen from this peer.
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
}
