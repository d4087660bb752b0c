//! Reconnecting relay client.
//!
//! One background task owns the socket. It connects, forwards queued
//! outbound events, folds inbound broadcasts into a [`LocalView`] and
//! republishes them. On any disconnect it waits with exponential backoff
//! and tries again until shut down.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use sos_core::backoff::Backoff;
use sos_core::{Event, SubjectId, decode, encode};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::view::LocalView;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Received events buffered per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Link state as observed by the background task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing the relay.
    Connecting,
    /// Socket open.
    Connected,
    /// Between attempts, or shut down.
    Disconnected,
}

/// Entry point for starting a client.
pub struct RelayClient;

impl RelayClient {
    /// Start the background connection task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: ClientConfig) -> ClientHandle {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let view = Arc::new(RwLock::new(LocalView::new()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(ClientTask {
            config,
            outbound: outbound_rx,
            events: events_tx.clone(),
            view: Arc::clone(&view),
            state: state_tx,
            cancel: cancel.clone(),
            pending: None,
        }));

        ClientHandle {
            outbound: outbound_tx,
            events: events_tx,
            view,
            state: state_rx,
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to a running client. Dropping it stops the background task.
pub struct ClientHandle {
    outbound: mpsc::Sender<Event>,
    events: broadcast::Sender<Event>,
    view: Arc<RwLock<LocalView>>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    /// Raise an SOS for `subject`.
    pub async fn raise_sos(&self, subject: &str) -> Result<()> {
        self.send(Event::sos(SubjectId::parse(subject)?)).await
    }

    /// Mark `subject` as being helped.
    pub async fn assign_help(&self, subject: &str) -> Result<()> {
        self.send(Event::assign_help(SubjectId::parse(subject)?)).await
    }

    /// Queue an event for the relay.
    ///
    /// Events queued while disconnected go out after the next successful
    /// connect, and an event whose write fails is sent again after the
    /// reconnect. The local view is not touched; it only moves when the
    /// relay echoes the event back.
    pub async fn send(&self, event: Event) -> Result<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Receive every event broadcast by the relay from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Snapshot of the local view.
    pub fn view(&self) -> LocalView {
        self.view.read().clone()
    }

    /// Watch the connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop the background task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ClientTask {
    config: ClientConfig,
    outbound: mpsc::Receiver<Event>,
    events: broadcast::Sender<Event>,
    view: Arc<RwLock<LocalView>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    /// Event whose last write failed, sent first on the next connection.
    pending: Option<Event>,
}

/// How a connected session ended.
enum SessionEnd {
    Shutdown,
    Dropped(String),
}

async fn run(mut task: ClientTask) {
    let mut backoff = Backoff::new(task.config.initial_backoff, task.config.max_backoff);

    loop {
        let _ = task.state.send(ConnectionState::Connecting);
        let attempt = tokio::select! {
            () = task.cancel.cancelled() => break,
            res = connect_async(task.config.url.as_str()) => res,
        };

        match attempt {
            Ok((ws, _)) => {
                backoff.reset();
                let _ = task.state.send(ConnectionState::Connected);
                info!(url = %task.config.url, "connected to relay");
                match drive(ws, &mut task).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped(reason) => {
                        warn!(url = %task.config.url, reason = %reason, "relay connection lost");
                    }
                }
            }
            Err(e) => {
                warn!(url = %task.config.url, error = %e, attempt = backoff.attempt(), "connect failed");
            }
        }

        let _ = task.state.send(ConnectionState::Disconnected);
        let delay = backoff.next_delay(rand::random::<f64>());
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting after delay");
        tokio::select! {
            () = task.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    let _ = task.state.send(ConnectionState::Disconnected);
    debug!("client task stopped");
}

async fn drive(ws: WsStream, task: &mut ClientTask) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    if let Some(event) = task.pending.take() {
        debug!(kind = %event.kind, subject = %event.subject, "resending event after reconnect");
        if let Err(e) = send_event(&mut sink, event, &mut task.pending).await {
            return SessionEnd::Dropped(e);
        }
    }

    loop {
        tokio::select! {
            () = task.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            event = task.outbound.recv() => {
                let Some(event) = event else {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                if let Err(e) = send_event(&mut sink, event, &mut task.pending).await {
                    return SessionEnd::Dropped(e);
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => deliver(text.as_bytes(), task),
                Some(Ok(Message::Binary(data))) => deliver(&data, task),
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Dropped("closed by relay".into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
            },
        }
    }
}

/// Write one event. On failure the event is parked in `pending`.
async fn send_event<S>(
    sink: &mut S,
    event: Event,
    pending: &mut Option<Event>,
) -> std::result::Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match sink.send(Message::text(encode(&event))).await {
        Ok(()) => Ok(()),
        Err(e) => {
            *pending = Some(event);
            Err(e.to_string())
        }
    }
}

fn deliver(raw: &[u8], task: &ClientTask) {
    match decode(raw) {
        Ok(event) => {
            let status = task.view.write().apply(&event);
            debug!(kind = %event.kind, subject = %event.subject, status = status.as_str(), "event received");
            let _ = task.events.send(event);
        }
        Err(e) => debug!(error = %e, "ignoring malformed broadcast"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use sos_core::SubjectStatus;
    use sos_server::{RelayServer, ServerConfig};
    use tokio_tungstenite::tungstenite;

    use super::*;

    fn unreachable_config() -> ClientConfig {
        ClientConfig {
            url: "ws://127.0.0.1:9/ws".into(),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            outbound_capacity: 2,
        }
    }

    #[tokio::test]
    async fn empty_subject_is_rejected_locally() {
        let handle = RelayClient::spawn(unreachable_config());
        let err = handle.raise_sos("   ").await.unwrap_err();
        assert_matches!(err, ClientError::InvalidSubject(_));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_relay_never_connects() {
        let handle = RelayClient::spawn(unreachable_config());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_ne!(*handle.connection_state().borrow(), ConnectionState::Connected);
        assert!(handle.view().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_reports_disconnected() {
        let handle = RelayClient::spawn(unreachable_config());
        let state = handle.connection_state();
        handle.shutdown().await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_after_task_exit_is_closed() {
        let mut handle = RelayClient::spawn(unreachable_config());
        handle.cancel.cancel();
        if let Some(task) = handle.task.take() {
            task.await.unwrap();
        }
        let err = handle.raise_sos("Rikas").await.unwrap_err();
        assert_eq!(err, ClientError::Closed);
    }

    #[tokio::test]
    async fn failed_write_parks_the_event() {
        let mut sink = Box::pin(futures::sink::unfold((), |(), _msg: Message| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        }));
        let mut pending = None;
        let event = Event::sos(SubjectId::parse("Rikas").unwrap());

        let err = send_event(&mut sink, event.clone(), &mut pending).await.unwrap_err();
        assert!(!err.is_empty());
        assert_eq!(pending, Some(event));
    }

    #[tokio::test]
    async fn successful_write_leaves_nothing_pending() {
        let mut sink = Box::pin(futures::sink::unfold(0usize, |sent, _msg: Message| async move {
            Ok::<_, tungstenite::Error>(sent + 1)
        }));
        let mut pending = None;

        send_event(&mut sink, Event::assign_help(SubjectId::parse("Rikas").unwrap()), &mut pending)
            .await
            .unwrap();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn pending_event_is_sent_first_after_connect() {
        let server = RelayServer::new(ServerConfig {
            port: 0,
            ..ServerConfig::default()
        });
        let (addr, _serve) = server.listen().await.unwrap();

        let (_outbound_tx, outbound_rx) = mpsc::channel(1);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(ClientTask {
            config: ClientConfig {
                url: format!("ws://{addr}/ws"),
                ..unreachable_config()
            },
            outbound: outbound_rx,
            events: events_tx,
            view: Arc::new(RwLock::new(LocalView::new())),
            state: state_tx,
            cancel: cancel.clone(),
            pending: Some(Event::sos(SubjectId::parse("Rikas").unwrap())),
        }));

        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snap = server.relay().snapshot().await.unwrap();
                if !snap.is_empty() {
                    return snap;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pending event never reached the relay");
        assert_eq!(snapshot[0].status, SubjectStatus::Alerting);

        cancel.cancel();
        task.await.unwrap();
        assert!(server.stop(Some(Duration::from_secs(5))).await);
    }
}
