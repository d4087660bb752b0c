//! Outbound SMS gateway settings.

use serde::{Deserialize, Serialize};

/// Credentials and endpoint of the SMS gateway.
///
/// SMS forwarding is disabled unless both `device_id` and `api_key` are set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsSettings {
    /// Gateway base URL, without trailing slash.
    pub base_url: String,
    /// Gateway device identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Gateway API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl SmsSettings {
    /// Whether enough is configured to send messages.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.device_id) && set(&self.api_key)
    }
}

impl Default for SmsSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.textbee.dev".to_string(),
            device_id: None,
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

impl std::fmt::Debug for SmsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsSettings")
            .field("base_url", &self.base_url)
            .field("device_id", &self.device_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
