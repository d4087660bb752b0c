//! # sos-client
//!
//! Client side of the SOS relay: keeps one WebSocket open to the relay,
//! reconnects with exponential backoff, and maintains a local view of
//! subject state from the broadcasts it receives.
//!
//! There is no catch-up on reconnect. A client that was offline when an
//! event went out learns the subject's state at the next broadcast.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod view;

pub use client::{ClientHandle, ConnectionState, RelayClient};
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
pub use view::LocalView;
