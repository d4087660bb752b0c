//! Client error types.

use thiserror::Error;

/// Errors returned by [`ClientHandle`](crate::ClientHandle) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The background connection task has exited.
    #[error("client has shut down")]
    Closed,
    /// The subject identifier was empty after trimming.
    #[error("invalid subject: {0}")]
    InvalidSubject(#[from] sos_core::CoreError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
