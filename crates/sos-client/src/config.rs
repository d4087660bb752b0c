//! Client configuration.

use std::time::Duration;

/// Connection settings for a [`RelayClient`](crate::RelayClient).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// First reconnect delay.
    pub initial_backoff: Duration,
    /// Reconnect delay ceiling.
    pub max_backoff: Duration,
    /// Events buffered while disconnected before `send` waits.
    pub outbound_capacity: usize,
}

impl ClientConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            outbound_capacity: 64,
        }
    }
}
