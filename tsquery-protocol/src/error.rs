//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding query lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("not a status line: {0}")]
    NotAStatusLine(String),

    #[error("not a notification line: {0}")]
    NotANotification(String),
}
