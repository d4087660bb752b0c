//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a partial
//! settings file only needs the values it changes.

mod server;
mod sms;

pub use server::*;
pub use sms::*;

use serde::{Deserialize, Serialize};
use sos_core::logging::LogFormat;

/// Root settings for the relay.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// SMS gateway.
    pub sms: SmsSettings,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, e.g. `info` or `sos_server=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
