//! Connection registry.
//!
//! Membership changes only through [`ConnectionRegistry::register`] and
//! [`ConnectionRegistry::unregister`]. Broadcasts iterate a point-in-time
//! [`snapshot`](ConnectionRegistry::snapshot), never the live map.
//!
//! The connection cap is enforced with [`ConnectionRegistry::try_reserve`]
//! before the HTTP upgrade, so upgrades still in flight count against it.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use parking_lot::RwLock;
use sos_core::ConnectionId;
use tracing::debug;

use super::connection::Connection;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Tracks every open client connection, ordered by registration.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<Connection>>>,
    reserved: AtomicUsize,
}

/// A connection slot held between the HTTP upgrade and registration.
///
/// Counts against the cap until dropped.
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation {
    registry: Arc<ConnectionRegistry>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let _ = self.registry.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot if live plus reserved connections stay below `max`.
    pub fn try_reserve(self: &Arc<Self>, max: usize) -> Option<Reservation> {
        // The write lock orders reservations against `register`.
        let conns = self.connections.write();
        if conns.len() + self.reserved.load(Ordering::Acquire) >= max {
            return None;
        }
        let _ = self.reserved.fetch_add(1, Ordering::AcqRel);
        drop(conns);
        Some(Reservation {
            registry: Arc::clone(self),
        })
    }

    /// Slots reserved by upgrades that have not registered yet.
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Admit an established connection. Returns its registration handle.
    ///
    /// Registering the same connection twice leaves a single entry.
    pub fn register(&self, connection: Arc<Connection>) -> ConnectionId {
        let id = connection.id();
        let mut conns = self.connections.write();
        if let Entry::Vacant(slot) = conns.entry(id) {
            let _ = slot.insert(connection);
            counter!(WS_CONNECTIONS_TOTAL).increment(1);
        }
        record_active(conns.len());
        id
    }

    /// Remove a connection and signal its session to close.
    ///
    /// Idempotent: returns `false` if the handle was already removed.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut conns = self.connections.write();
            let removed = conns.remove(&id);
            record_active(conns.len());
            removed
        };
        match removed {
            Some(conn) => {
                conn.close();
                counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
                debug!(conn_id = %id, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of the live connections, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(len: usize) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(len as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::open(4);
        let id = registry.register(conn.clone());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));

        assert!(registry.unregister(id));
        assert!(registry.is_empty());
        assert!(conn.is_closed());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::open(4);
        let id = registry.register(conn);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_register_keeps_one_entry() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::open(4);
        let a = registry.register(conn.clone());
        let b = registry.register(conn);
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_registration() {
        let registry = ConnectionRegistry::new();
        let mut ids = Vec::new();
        let mut rxs = Vec::new();
        for _ in 0..5 {
            let (conn, rx) = Connection::open(1);
            ids.push(registry.register(conn));
            rxs.push(rx);
        }
        let snap: Vec<_> = registry.snapshot().iter().map(|c| c.id()).collect();
        assert_eq!(snap, ids);
    }

    #[test]
    fn snapshot_is_isolated_from_later_changes() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = Connection::open(1);
        let (b, _rb) = Connection::open(1);
        let a_id = registry.register(a);
        let snap = registry.snapshot();

        let _ = registry.register(b);
        let _ = registry.unregister(a_id);

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id(), a_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reservations_count_against_cap() {
        let registry = Arc::new(ConnectionRegistry::new());
        let first = registry.try_reserve(2).unwrap();
        let _second = registry.try_reserve(2).unwrap();
        assert!(registry.try_reserve(2).is_none());
        assert_eq!(registry.reserved(), 2);

        drop(first);
        assert_eq!(registry.reserved(), 1);
        assert!(registry.try_reserve(2).is_some());
    }

    #[test]
    fn registered_connection_takes_over_its_slot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let slot = registry.try_reserve(1).unwrap();
        let (conn, _rx) = Connection::open(1);
        let id = registry.register(conn);
        drop(slot);

        assert_eq!(registry.reserved(), 0);
        assert!(registry.try_reserve(1).is_none());
        let _ = registry.unregister(id);
        assert!(registry.try_reserve(1).is_some());
    }

    #[test]
    fn concurrent_reservations_never_exceed_cap() {
        let registry = Arc::new(ConnectionRegistry::new());
        let granted: Vec<Reservation> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.try_reserve(4)))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect()
        });
        assert_eq!(granted.len(), 4);
        assert_eq!(registry.reserved(), 4);
        drop(granted);
        assert_eq!(registry.reserved(), 0);
    }
}
