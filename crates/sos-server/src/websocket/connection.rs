//! State of one live WebSocket client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sos_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Why a non-blocking send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The outbound queue is at capacity; the peer is not keeping up.
    Full,
    /// The session's writer has gone away.
    Closed,
}

impl SendFailure {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// A connected WebSocket client.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection around an existing outbound sender.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            closed: CancellationToken::new(),
        }
    }

    /// Allocate a fresh id and a bounded outbound queue.
    ///
    /// The receiver belongs to the session writer.
    pub fn open(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(ConnectionId::next(), tx)), rx)
    }

    /// Registry handle of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, message: Arc<str>) -> Result<(), SendFailure> {
        if self.closed.is_cancelled() {
            return Err(SendFailure::Closed);
        }
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Record activity from the client (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the client was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Signal the owning session to close the socket.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_success() {
        let (conn, mut rx) = Connection::open(4);
        assert!(conn.try_send(Arc::from("hello")).is_ok());
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_queue_is_reported() {
        let (conn, _rx) = Connection::open(1);
        assert!(conn.try_send(Arc::from("a")).is_ok());
        assert_eq!(conn.try_send(Arc::from("b")), Err(SendFailure::Full));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (conn, rx) = Connection::open(4);
        drop(rx);
        assert_eq!(conn.try_send(Arc::from("a")), Err(SendFailure::Closed));
    }

    #[test]
    fn closed_connection_refuses_sends() {
        let (conn, _rx) = Connection::open(4);
        let token = conn.closed_token();
        conn.close();
        assert!(token.is_cancelled());
        assert!(conn.is_closed());
        assert_eq!(conn.try_send(Arc::from("a")), Err(SendFailure::Closed));
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = Connection::open(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn ids_are_distinct() {
        let (a, _ra) = Connection::open(1);
        let (b, _rb) = Connection::open(1);
        assert_ne!(a.id(), b.id());
        assert!(a.age() < Duration::from_secs(5));
    }

    #[test]
    fn age_tracks_time_since_open() {
        let (conn, _rx) = Connection::open(1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(conn.age() >= Duration::from_millis(20));
    }
}
