//! JSON wire codec.
//!
//! Every message is a single JSON object `{"type": ..., "user": ...}`.
//! Decoding validates shape before anything reaches the relay, so the
//! state machine never sees a structurally unsound [`Event`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::errors::CoreError;
use crate::event::{Event, EventKind, SubjectId};

/// Why an inbound payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not well-formed JSON, or not a JSON object.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// A required field is absent or null.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A required field is present but not a string.
    #[error("field `{0}` must be a string")]
    InvalidField(&'static str),
    /// `type` is a string but not one of the recognized kinds.
    #[error("unknown event type `{0}`")]
    UnknownKind(String),
    /// `user` is empty after trimming.
    #[error("subject identifier is empty")]
    EmptySubject,
}

impl DecodeError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField(_) => "invalid_field",
            Self::UnknownKind(_) => "unknown_kind",
            Self::EmptySubject => "empty_subject",
        }
    }
}

impl From<CoreError> for DecodeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::EmptySubject => Self::EmptySubject,
        }
    }
}

/// Decode a raw UTF-8 JSON payload into an [`Event`].
pub fn decode(raw: &[u8]) -> Result<Event, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".into()));
    };

    let kind_name = required_str(&map, "type")?;
    let kind = EventKind::from_wire(kind_name)
        .ok_or_else(|| DecodeError::UnknownKind(kind_name.to_owned()))?;
    let subject = SubjectId::parse(required_str(&map, "user")?)?;

    Ok(Event::new(kind, subject))
}

/// Encode an [`Event`] as minimal JSON containing exactly `type` and `user`.
#[must_use]
pub fn encode(event: &Event) -> String {
    serde_json::json!({
        "type": event.kind.as_str(),
        "user": event.subject.as_str(),
    })
    .to_string()
}

fn required_str<'a>(map: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, DecodeError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidField(field)),
    }
}
