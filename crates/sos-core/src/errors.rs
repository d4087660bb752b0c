//! Core error types.

use thiserror::Error;

/// Errors raised while constructing core domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A subject identifier was empty after trimming whitespace.
    #[error("subject identifier must not be empty")]
    EmptySubject,
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_subject_display() {
        assert_eq!(
            CoreError::EmptySubject.to_string(),
            "subject identifier must not be empty"
        );
    }
}
