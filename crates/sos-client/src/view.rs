//! Client-side view of subject state, rebuilt purely from broadcasts.

use std::collections::HashMap;

use sos_core::{Event, SubjectId, SubjectStatus};

/// Subject statuses as seen by one client.
///
/// Starts empty on every process start. Unknown subjects read as
/// [`SubjectStatus::Safe`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalView {
    subjects: HashMap<SubjectId, SubjectStatus>,
}

impl LocalView {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one received event into the view, returning the new status.
    pub fn apply(&mut self, event: &Event) -> SubjectStatus {
        let status = self.subjects.entry(event.subject.clone()).or_default();
        *status = status.next(event.kind);
        *status
    }

    /// Current status of `subject`.
    pub fn status(&self, subject: &SubjectId) -> SubjectStatus {
        self.subjects.get(subject).copied().unwrap_or_default()
    }

    /// Whether `subject` has an unanswered SOS.
    pub fn is_alerting(&self, subject: &SubjectId) -> bool {
        self.status(subject) == SubjectStatus::Alerting
    }

    /// Subjects currently alerting, sorted.
    pub fn alerting(&self) -> Vec<SubjectId> {
        let mut ids: Vec<_> = self
            .subjects
            .iter()
            .filter(|(_, s)| **s == SubjectStatus::Alerting)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of subjects seen.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether no event has been received yet.
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
