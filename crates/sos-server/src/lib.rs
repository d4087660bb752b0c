//! # sos-server
//!
//! Axum HTTP + `WebSocket` relay for SOS events.
//!
//! - `WebSocket` gateway on `/` and `/ws`: connection registry, heartbeat,
//!   codec validation at the boundary
//! - Single-writer relay task owning the subject table
//! - Broadcast dispatcher with per-connection eviction
//! - HTTP endpoints: health, metrics, subject view, SMS forwarding
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod sms;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{RelayError, ServerError};
pub use relay::RelayHandle;
pub use server::RelayServer;
