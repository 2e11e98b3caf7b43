//! Error types for a3s-cron

use crate::pattern::FieldKind;
use thiserror::Error;

/// Errors that can occur while parsing patterns or driving the scheduler
#[derive(Debug, Error)]
pub enum CronError {
    /// A token in a pattern field could not be understood
    #[error("Invalid {field} syntax: '{token}'")]
    InvalidFieldSyntax { field: FieldKind, token: String },

    /// A numeric value falls outside the field's domain
    #[error("Value {value} out of range ({min}-{max}) in {field}")]
    OutOfRange {
        field: FieldKind,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A field expression expanded to no values at all
    #[error("No valid values in {field}")]
    EmptyField { field: FieldKind },

    /// Wrong number of whitespace separated fields
    #[error("Expected 5 to 7 fields, got {0}")]
    FieldCount(usize),

    /// The next-match search gave up
    #[error("No match found for pattern '{pattern}' after {iterations} iterations")]
    NoMatchFound { pattern: String, iterations: usize },

    /// Task id is not registered
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// `start()` called on a running scheduler
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// `stop()` called on a stopped scheduler
    #[error("Scheduler is not running")]
    NotRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CronError {
    /// Whether this error was raised while parsing a pattern
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            CronError::InvalidFieldSyntax { .. }
                | CronError::OutOfRange { .. }
                | CronError::EmptyField { .. }
                | CronError::FieldCount(_)
        )
    }
}

/// Why a single task execution failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    /// The task body returned an error
    #[error("task returned an error: {0}")]
    Error(String),

    /// The task body panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Result type alias for cron operations
pub type Result<T> = std::result::Result<T, CronError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_field() {
        let err = CronError::InvalidFieldSyntax {
            field: FieldKind::Month,
            token: "foo".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid month syntax: 'foo'");

        let err = CronError::OutOfRange {
            field: FieldKind::Hour,
            value: 24,
            min: 0,
            max: 23,
        };
        assert_eq!(err.to_string(), "Value 24 out of range (0-23) in hour");
    }

    #[test]
    fn test_is_parse_error() {
        assert!(CronError::FieldCount(3).is_parse_error());
        assert!(CronError::EmptyField {
            field: FieldKind::Year
        }
        .is_parse_error());
        assert!(!CronError::NotRunning.is_parse_error());
        assert!(!CronError::TaskNotFound("x".into()).is_parse_error());
    }
}
