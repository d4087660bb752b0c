//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Events applied by the relay (counter, labels: kind).
pub const RELAY_EVENTS_TOTAL: &str = "relay_events_total";
/// Inbound payloads rejected by the codec (counter, labels: reason).
pub const RELAY_DECODE_FAILURES_TOTAL: &str = "relay_decode_failures_total";
/// Messages accepted by connection queues (counter).
pub const RELAY_DISPATCH_DELIVERIES_TOTAL: &str = "relay_dispatch_deliveries_total";
/// Connections evicted during dispatch (counter).
pub const RELAY_DISPATCH_EVICTIONS_TOTAL: &str = "relay_dispatch_evictions_total";
/// SMS gateway requests (counter, labels: outcome).
pub const SMS_REQUESTS_TOTAL: &str = "sms_requests_total";
