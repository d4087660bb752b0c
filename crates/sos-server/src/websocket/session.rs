//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use sos_core::{ConnectionId, decode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::Connection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::registry::{ConnectionRegistry, Reservation};
use crate::metrics::{RELAY_DECODE_FAILURES_TOTAL, WS_CONNECTION_DURATION_SECONDS};
use crate::relay::RelayHandle;

/// How long the writer may take to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Registry the session joins.
    pub registry: Arc<ConnectionRegistry>,
    /// Submitter for decoded events.
    pub relay: RelayHandle,
    /// Per-connection outbound queue depth.
    pub outbound_capacity: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before disconnect.
    pub heartbeat_timeout: Duration,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Run a WebSocket session for a freshly upgraded socket.
///
/// 1. Registers the connection in the slot reserved at upgrade time (no
///    handshake payload is sent)
/// 2. Forwards the outbound queue to the socket and sends periodic pings
/// 3. Decodes inbound frames and submits accepted events to the relay
/// 4. Unregisters on close, transport error, heartbeat timeout, eviction or
///    server shutdown
pub async fn run_ws_session(ws: WebSocket, ctx: SessionContext, slot: Reservation) {
    let (connection, outbound) = Connection::open(ctx.outbound_capacity);
    let conn_id = ctx.registry.register(Arc::clone(&connection));
    drop(slot);
    serve(ws, conn_id, connection, outbound, ctx).await;
}

#[instrument(skip_all, fields(conn_id = %conn_id))]
async fn serve(
    ws: WebSocket,
    conn_id: ConnectionId,
    connection: Arc<Connection>,
    mut outbound: tokio::sync::mpsc::Receiver<Arc<str>>,
    ctx: SessionContext,
) {
    info!("client connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let closed = connection.closed_token();

    // Outbound forwarder with periodic pings.
    let writer_closed = closed.clone();
    let ping_every = ctx.heartbeat_interval;
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = outbound.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = writer_closed.cancelled() => break,
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Liveness watchdog.
    let hb_registry = Arc::clone(&ctx.registry);
    let heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&connection),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
        closed.clone(),
    ));
    let watchdog = tokio::spawn(async move {
        if let Ok(HeartbeatResult::TimedOut) = heartbeat.await {
            warn!(conn_id = %conn_id, "client unresponsive, disconnecting");
            let _ = hb_registry.unregister(conn_id);
        }
    });

    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => {
                debug!("connection closed by server");
                break;
            }
            () = ctx.shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                info!(error = %e, "transport error");
                break;
            }
            None => break,
        };

        connection.mark_alive();
        let accepted = match msg {
            Message::Text(text) => handle_payload(text.as_bytes(), conn_id, &ctx.relay).await,
            Message::Binary(data) => handle_payload(&data, conn_id, &ctx.relay).await,
            Message::Ping(_) | Message::Pong(_) => true,
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
        };
        if !accepted {
            break;
        }
    }

    let _ = ctx.registry.unregister(conn_id);
    watchdog.abort();
    let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;

    let age = connection.age();
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
    info!(
        duration_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
}

/// Decode one payload and hand it to the relay.
///
/// Returns `false` only when the relay has stopped and the session should end.
async fn handle_payload(raw: &[u8], conn_id: ConnectionId, relay: &RelayHandle) -> bool {
    match decode(raw) {
        Ok(event) => {
            debug!(kind = %event.kind, subject = %event.subject, "event accepted");
            relay.submit(event, Some(conn_id)).await.is_ok()
        }
        Err(e) => {
            counter!(RELAY_DECODE_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
            debug!(error = %e, len = raw.len(), "dropping malformed message");
            true
        }
    }
}
