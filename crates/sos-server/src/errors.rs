//! Server error types.

use thiserror::Error;

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Errors returned to callers submitting work to the relay task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The relay task has exited and accepts no more events.
    #[error("relay task has stopped")]
    Stopped,
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
