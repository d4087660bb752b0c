//! WebSocket connection management, heartbeat, sessions and broadcasting.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod registry;
pub mod session;
