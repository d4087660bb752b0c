//! # sos-core
//!
//! Shared building blocks for the SOS relay and its clients.
//!
//! - [`event`]: subjects, event kinds and the immutable [`Event`] message
//! - [`codec`]: JSON wire codec with validation at the boundary
//! - [`relay`]: the per-subject `safe → alerting → assisted` state machine
//! - [`ids`]: process-unique connection identifiers
//! - [`backoff`]: reconnect delay math used by client shims
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod backoff;
pub mod codec;
pub mod errors;
pub mod event;
pub mod ids;
pub mod logging;
pub mod relay;

pub use codec::{DecodeError, decode, encode};
pub use errors::{CoreError, Result};
pub use event::{Event, EventKind, SubjectId};
pub use ids::ConnectionId;
pub use relay::{SubjectRecord, SubjectStatus, SubjectTable, SubjectView, Transition};
