//! Shutdown of the listener, the relay task and every live session.
//!
//! Long-lived work is started through [`ShutdownCoordinator::spawn`] or
//! wrapped with [`ShutdownCoordinator::track`], so [`drain`] can wait for
//! all of it after cancelling the shared token.
//!
//! [`drain`]: ShutdownCoordinator::drain

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Used by [`ShutdownCoordinator::drain`] when the caller passes no timeout.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancellation token plus the set of tasks that must finish before exit.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Wrap a future that some other executor spawns (e.g. a WebSocket
    /// upgrade callback) so shutdown waits for it too.
    pub fn track<F: Future>(&self, task: F) -> TrackedFuture<F> {
        self.tasks.track_future(task)
    }

    /// Tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel the token, then wait for every tracked task.
    ///
    /// Returns `false` if tasks were still running when `timeout` expired.
    pub async fn drain(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let _ = self.tasks.close();
        self.token.cancel();
        info!(
            tasks = self.tasks.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining tasks"
        );

        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok() {
            true
        } else {
            warn!(remaining = self.tasks.len(), "shutdown timed out, abandoning tasks");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_cancels_and_waits_for_spawned_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let _ = coord.spawn(async move { token.cancelled().await });
        assert_eq!(coord.active_tasks(), 1);

        assert!(coord.drain(Some(Duration::from_secs(1))).await);
        assert!(coord.is_shutting_down());
        assert_eq!(coord.active_tasks(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_tracked_futures() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let tracked = coord.track(async move { token.cancelled().await });
        let _ = tokio::spawn(tracked);

        assert!(coord.drain(Some(Duration::from_secs(1))).await);
        assert_eq!(coord.active_tasks(), 0);
    }

    #[tokio::test]
    async fn drain_reports_stragglers() {
        let coord = ShutdownCoordinator::new();
        let _ = coord.spawn(tokio::time::sleep(Duration::from_secs(60)));
        let start = std::time::Instant::now();

        assert!(!coord.drain(Some(Duration::from_millis(50))).await);
        assert_eq!(coord.active_tasks(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn drain_with_nothing_tracked_returns_immediately() {
        let coord = ShutdownCoordinator::new();
        assert!(coord.drain(None).await);
        assert!(coord.token().is_cancelled());
    }
}
