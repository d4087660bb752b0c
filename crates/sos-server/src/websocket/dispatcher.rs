//! Event fan-out to every registered connection.

use std::sync::Arc;

use metrics::counter;
use sos_core::{ConnectionId, Event, encode};
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::metrics::{RELAY_DISPATCH_DELIVERIES_TOTAL, RELAY_DISPATCH_EVICTIONS_TOTAL};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections in the snapshot.
    pub attempted: usize,
    /// Connections whose queue accepted the message.
    pub delivered: usize,
    /// Connections removed because the send failed.
    pub evicted: Vec<ConnectionId>,
}

/// Delivers outbound events to the connections in a [`ConnectionRegistry`].
///
/// Fire-and-forget: no acknowledgement, no retry. A failed send evicts only
/// the failing connection and never interrupts the rest of the broadcast.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Registry this dispatcher broadcasts to.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Encode `event` once and offer it to every live connection.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let payload: Arc<str> = Arc::from(encode(event));
        let snapshot = self.registry.snapshot();
        let mut report = DispatchReport {
            attempted: snapshot.len(),
            ..DispatchReport::default()
        };

        for conn in &snapshot {
            match conn.try_send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!(
                        conn_id = %conn.id(),
                        reason = reason.as_str(),
                        age_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX),
                        "delivery failed, evicting connection"
                    );
                    report.evicted.push(conn.id());
                }
            }
        }

        for id in &report.evicted {
            let _ = self.registry.unregister(*id);
        }

        counter!(RELAY_DISPATCH_DELIVERIES_TOTAL).increment(report.delivered as u64);
        counter!(RELAY_DISPATCH_EVICTIONS_TOTAL).increment(report.evicted.len() as u64);
        debug!(
            kind = %event.kind,
            subject = %event.subject,
            recipients = report.delivered,
            evicted = report.evicted.len(),
            "broadcast event"
        );
        report
    }
}
