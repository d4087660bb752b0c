//! Settings loading with deep merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SOS_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use sos_core::logging::LogFormat;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Resolve the default settings file path (`~/.sos-relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sos-relay").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with(path, |key| std::env::var(key).ok())
}

/// Load settings from `path`, reading overrides through `lookup`.
pub fn load_with<F>(path: &Path, lookup: F) -> Result<RelaySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored, leaving the file or default value in place.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(&lookup);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SOS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("SOS_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("SOS_MAX_CONNECTIONS", |s| parse_usize_range(s, 1, 1_000_000)) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("SOS_OUTBOUND_QUEUE", |s| parse_usize_range(s, 1, 65_536)) {
        settings.server.outbound_queue_capacity = v;
    }
    if let Some(v) = env.parsed("SOS_RELAY_QUEUE", |s| parse_usize_range(s, 1, 1_048_576)) {
        settings.server.relay_queue_capacity = v;
    }
    if let Some(v) = env.parsed("SOS_HEARTBEAT_INTERVAL_SECS", |s| parse_u64_range(s, 1, 3600)) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.parsed("SOS_HEARTBEAT_TIMEOUT_SECS", |s| parse_u64_range(s, 1, 86_400)) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SOS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("SOS_LOG_FORMAT", |s| s.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }

    // ── SMS ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("SOS_SMS_BASE_URL") {
        settings.sms.base_url = v;
    }
    if let Some(v) = env.string("SOS_SMS_DEVICE_ID") {
        settings.sms.device_id = Some(v);
    }
    if let Some(v) = env.string("SOS_SMS_API_KEY") {
        settings.sms.api_key = Some(v);
    }
    if let Some(v) = env.parsed("SOS_SMS_TIMEOUT_MS", |s| parse_u64_range(s, 100, 300_000)) {
        settings.sms.timeout_ms = v;
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    let server = &settings.server;
    let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

    if server.host.trim().is_empty() {
        return invalid("server.host must not be empty");
    }
    if server.max_connections == 0 {
        return invalid("server.maxConnections must be at least 1");
    }
    if server.outbound_queue_capacity == 0 {
        return invalid("server.outboundQueueCapacity must be at least 1");
    }
    if server.relay_queue_capacity == 0 {
        return invalid("server.relayQueueCapacity must be at least 1");
    }
    if server.heartbeat_interval_secs == 0 {
        return invalid("server.heartbeatIntervalSecs must be at least 1");
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return invalid("server.heartbeatTimeoutSecs must not be below heartbeatIntervalSecs");
    }
    if server.max_message_size == 0 {
        return invalid("server.maxMessageSize must be at least 1");
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.string(key)?;
        let result = parse(&raw);
        if result.is_none() {
            warn!(key, value = %raw, "invalid env override, ignoring");
        }
        result
    }
}
