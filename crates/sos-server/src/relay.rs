//! Single-writer relay task.
//!
//! Sessions decode inbound frames and submit accepted events through a
//! [`RelayHandle`]. One task owns the [`SubjectTable`], applies events in
//! queue order and dispatches each resulting broadcast before taking the
//! next command, so two events for the same subject are never applied
//! concurrently or out of acceptance order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use metrics::counter;
use sos_core::{ConnectionId, Event, SubjectTable, SubjectView};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::RelayError;
use crate::metrics::RELAY_EVENTS_TOTAL;
use crate::websocket::dispatcher::Dispatcher;

/// An event that passed decoding, stamped with its acceptance time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Decoded event.
    pub event: Event,
    /// Connection it arrived on, if any.
    pub origin: Option<ConnectionId>,
    /// Server-assigned receipt time.
    pub received_at: DateTime<Utc>,
}

impl Accepted {
    /// Stamp `event` with the current time.
    pub fn now(event: Event, origin: Option<ConnectionId>) -> Self {
        Self {
            event,
            origin,
            received_at: Utc::now(),
        }
    }
}

/// Work items consumed by the relay task.
#[derive(Debug)]
pub enum RelayCommand {
    /// Apply a transition and broadcast the outbound event.
    Apply(Accepted),
    /// Read the current subject table.
    Snapshot(oneshot::Sender<Vec<SubjectView>>),
}

/// Cloneable submitter for the relay task.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
    subjects: Arc<AtomicUsize>,
}

impl RelayHandle {
    /// Queue a decoded event, stamping its acceptance time now.
    ///
    /// Waits only if the relay queue is full.
    pub async fn submit(&self, event: Event, origin: Option<ConnectionId>) -> Result<(), RelayError> {
        self.send(RelayCommand::Apply(Accepted::now(event, origin)))
            .await
    }

    /// Point-in-time copy of every known subject.
    pub async fn snapshot(&self) -> Result<Vec<SubjectView>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| RelayError::Stopped)
    }

    /// Number of subjects seen so far.
    pub fn subject_count(&self) -> usize {
        self.subjects.load(Ordering::Relaxed)
    }

    /// Whether the relay task has exited.
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).await.map_err(|_| RelayError::Stopped)
    }
}

/// Spawn the relay task.
///
/// The task stops when `shutdown` is cancelled or every [`RelayHandle`]
/// has been dropped.
pub fn spawn_relay(
    dispatcher: Dispatcher,
    capacity: usize,
    shutdown: CancellationToken,
) -> (RelayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let subjects = Arc::new(AtomicUsize::new(0));
    let handle = RelayHandle {
        tx,
        subjects: Arc::clone(&subjects),
    };
    let task = tokio::spawn(run_relay(rx, dispatcher, subjects, shutdown));
    (handle, task)
}

async fn run_relay(
    mut rx: mpsc::Receiver<RelayCommand>,
    dispatcher: Dispatcher,
    subjects: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    let mut table = SubjectTable::new();
    info!("relay task started");

    loop {
        let cmd = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match cmd {
            RelayCommand::Apply(accepted) => {
                let transition = table.apply(&accepted.event, accepted.received_at);
                subjects.store(table.len(), Ordering::Relaxed);
                counter!(RELAY_EVENTS_TOTAL, "kind" => accepted.event.kind.as_str()).increment(1);
                info!(
                    subject = %transition.subject,
                    kind = %accepted.event.kind,
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    origin = ?accepted.origin.map(|id| id.to_string()),
                    "event applied"
                );
                let report = dispatcher.dispatch(&transition.outbound);
                debug!(
                    recipients = report.delivered,
                    evicted = report.evicted.len(),
                    "event dispatched"
                );
            }
            RelayCommand::Snapshot(reply) => {
                let _ = reply.send(table.snapshot());
            }
        }
    }

    rx.close();
    info!(subjects = table.len(), "relay task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sos_core::{SubjectId, SubjectStatus};

    use super::*;
    use crate::websocket::connection::Connection;
    use crate::websocket::registry::ConnectionRegistry;

    fn subject(name: &str) -> SubjectId {
        SubjectId::parse(name).unwrap()
    }

    fn start() -> (RelayHandle, JoinHandle<()>, Arc<ConnectionRegistry>, CancellationToken) {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (handle, task) = spawn_relay(Dispatcher::new(registry.clone()), 16, shutdown.clone());
        (handle, task, registry, shutdown)
    }

    #[tokio::test]
    async fn applies_and_broadcasts_in_order() {
        let (relay, _task, registry, _shutdown) = start();
        let (conn, mut rx) = Connection::open(16);
        let _ = registry.register(conn);

        relay.submit(Event::sos(subject("Rikas")), None).await.unwrap();
        relay.submit(Event::assign_help(subject("Rikas")), None).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(&*first, r#"{"type":"sos","user":"Rikas"}"#);
        assert_eq!(&*second, r#"{"type":"assignHelp","user":"Rikas"}"#);

        let snap = relay.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].status, SubjectStatus::Assisted);
        assert_eq!(relay.subject_count(), 1);
    }

    #[tokio::test]
    async fn double_sos_stays_alerting_and_both_broadcast() {
        let (relay, _task, registry, _shutdown) = start();
        let (conn, mut rx) = Connection::open(16);
        let _ = registry.register(conn);

        relay.submit(Event::sos(subject("Rikas")), None).await.unwrap();
        relay.submit(Event::sos(subject("Rikas")), None).await.unwrap();
        let snap = relay.snapshot().await.unwrap();

        assert_eq!(snap[0].status, SubjectStatus::Alerting);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn concurrent_submitters_keep_per_subject_order() {
        let (relay, _task, _registry, _shutdown) = start();
        let mut tasks = Vec::new();
        for name in ["Amit", "Sita", "Rahul", "Rikas"] {
            let relay = relay.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    relay.submit(Event::sos(subject(name)), None).await.unwrap();
                }
                relay.submit(Event::assign_help(subject(name)), None).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let snap = relay.snapshot().await.unwrap();
        assert_eq!(snap.len(), 4);
        assert!(snap.iter().all(|v| v.status == SubjectStatus::Assisted));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_stopped() {
        let (relay, task, _registry, shutdown) = start();
        shutdown.cancel();
        task.await.unwrap();
        assert!(relay.is_stopped());
        assert_eq!(
            relay.submit(Event::sos(subject("Rikas")), None).await,
            Err(RelayError::Stopped)
        );
        assert_eq!(relay.snapshot().await, Err(RelayError::Stopped));
    }

    #[tokio::test]
    async fn task_exits_when_handles_drop() {
        let (relay, task, _registry, _shutdown) = start();
        drop(relay);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn accepted_is_stamped_by_server() {
        let before = Utc::now();
        let accepted = Accepted::now(Event::sos(subject("Rikas")), None);
        assert!(accepted.received_at >= before);
    }
}
