//! Subjects, event kinds and the wire-level [`Event`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, Result};

/// Identifier of the person (or entity) an SOS event concerns.
///
/// Always trimmed and never empty. Construct with [`SubjectId::parse`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Trim `raw` and wrap it, rejecting identifiers that end up empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::EmptySubject);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl FromStr for SubjectId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two recognized event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// A subject raised an SOS.
    Sos,
    /// An operator assigned help to a subject.
    AssignHelp,
}

impl EventKind {
    /// Wire name of the kind (`"sos"` / `"assignHelp"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sos => "sos",
            Self::AssignHelp => "assignHelp",
        }
    }

    /// Parse a wire name. Returns `None` for anything unrecognized.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "sos" => Some(Self::Sos),
            "assignHelp" => Some(Self::AssignHelp),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable notification exchanged over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Who it happened to.
    pub subject: SubjectId,
}

impl Event {
    /// Build an event.
    #[must_use]
    pub fn new(kind: EventKind, subject: SubjectId) -> Self {
        Self { kind, subject }
    }

    /// An `sos` event for `subject`.
    #[must_use]
    pub fn sos(subject: SubjectId) -> Self {
        Self::new(EventKind::Sos, subject)
    }

    /// An `assignHelp` event for `subject`.
    #[must_use]
    pub fn assign_help(subject: SubjectId) -> Self {
        Self::new(EventKind::AssignHelp, subject)
    }
}
