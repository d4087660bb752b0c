//! Per-subject state machine.
//!
//! Every subject starts `safe`. An `sos` always moves it to `alerting` and an
//! `assignHelp` always moves it to `assisted`; the function is total, so there
//! is no invalid transition. Re-announcements and idempotent assignments are
//! still broadcast.
//!
//! State lives only in process memory and resets to empty on restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind, SubjectId};

/// Derived status of a subject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    /// No unresolved SOS. Implied for any subject not yet seen.
    #[default]
    Safe,
    /// An SOS was raised and help has not been assigned since.
    Alerting,
    /// Help has been assigned since the last SOS.
    Assisted,
}

impl SubjectStatus {
    /// Next status after applying an event of `kind`.
    ///
    /// | current  | sos      | assignHelp |
    /// |----------|----------|------------|
    /// | safe     | alerting | assisted   |
    /// | alerting | alerting | assisted   |
    /// | assisted | alerting | assisted   |
    #[must_use]
    pub const fn next(self, kind: EventKind) -> Self {
        match kind {
            EventKind::Sos => Self::Alerting,
            EventKind::AssignHelp => Self::Assisted,
        }
    }

    /// Lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Alerting => "alerting",
            Self::Assisted => "assisted",
        }
    }
}

/// Stored state for one subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubjectRecord {
    /// Current status.
    pub status: SubjectStatus,
    /// Server receipt time of the event that produced `status`.
    pub updated_at: DateTime<Utc>,
}

/// Result of applying one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Subject the event concerned.
    pub subject: SubjectId,
    /// Status before the event.
    pub from: SubjectStatus,
    /// Status after the event.
    pub to: SubjectStatus,
    /// Event to broadcast to every live connection.
    pub outbound: Event,
}

impl Transition {
    /// Whether the status actually changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Serializable view of one subject, for operator endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectView {
    /// Subject identifier.
    pub subject: SubjectId,
    /// Current status.
    pub status: SubjectStatus,
    /// When the status was last set.
    pub updated_at: DateTime<Utc>,
}

/// In-memory subject state table.
///
/// Not synchronized: exactly one owner applies transitions, which is what
/// gives same-subject events their acceptance order.
#[derive(Debug, Default, Clone)]
pub struct SubjectTable {
    subjects: HashMap<SubjectId, SubjectRecord>,
}

impl SubjectTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an accepted event and return the transition it caused.
    pub fn apply(&mut self, event: &Event, received_at: DateTime<Utc>) -> Transition {
        let from = self.status(&event.subject);
        let to = from.next(event.kind);
        let _ = self.subjects.insert(
            event.subject.clone(),
            SubjectRecord {
                status: to,
                updated_at: received_at,
            },
        );
        Transition {
            subject: event.subject.clone(),
            from,
            to,
            outbound: event.clone(),
        }
    }

    /// Current status of `subject` (`Safe` if never seen).
    #[must_use]
    pub fn status(&self, subject: &SubjectId) -> SubjectStatus {
        self.subjects
            .get(subject)
            .map_or(SubjectStatus::Safe, |r| r.status)
    }

    /// Stored record for `subject`, if any event has been applied to it.
    #[must_use]
    pub fn record(&self, subject: &SubjectId) -> Option<&SubjectRecord> {
        self.subjects.get(subject)
    }

    /// Point-in-time copy of all known subjects, sorted by identifier.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubjectView> {
        let mut views: Vec<SubjectView> = self
            .subjects
            .iter()
            .map(|(subject, record)| SubjectView {
                subject: subject.clone(),
                status: record.status,
                updated_at: record.updated_at,
            })
            .collect();
        views.sort_by(|a, b| a.subject.cmp(&b.subject));
        views
    }

    /// Number of subjects that have received at least one event.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether no subject has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
