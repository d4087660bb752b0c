//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection's alive flag.
///
/// At each `interval` tick the flag is checked and cleared. After
/// `timeout / interval` consecutive silent ticks (at least one) the
/// connection is considered dead.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // The first tick fires immediately; start counting one interval in.
    let _ = check_interval.tick().await;

    let interval_ms = interval.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_millis() / interval_ms).max(1) as u32;
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let (conn, _rx) = Connection::open(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            conn,
            Duration::from_secs(100),
            Duration::from_secs(300),
            cancel.clone(),
        ));
        cancel.cancel();
        assert_eq!(task.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let (conn, _rx) = Connection::open(1);
        let _ = conn.check_alive();
        let result = run_heartbeat(
            conn,
            Duration::from_millis(10),
            Duration::from_millis(20),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test]
    async fn active_client_stays_alive() {
        let (conn, _rx) = Connection::open(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            conn.clone(),
            Duration::from_millis(50),
            Duration::from_millis(150),
            cancel.clone(),
        ));

        for _ in 0..20 {
            conn.mark_alive();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!task.is_finished());
        cancel.cancel();
        assert_eq!(task.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
