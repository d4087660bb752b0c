//! Network and connection settings.

use serde::{Deserialize, Serialize};

/// Listener and per-connection limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Bounded outbound queue per connection. A full queue evicts the peer.
    pub outbound_queue_capacity: usize,
    /// Bounded inbound queue in front of the relay task.
    pub relay_queue_capacity: usize,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a peer that has not answered for this many seconds.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1024,
            outbound_queue_capacity: 256,
            relay_queue_capacity: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}
