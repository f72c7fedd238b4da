//! Client error types.

use crate::config::ConfigError;
use thiserror::Error;
use tsquery_protocol::QueryError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] tsquery_protocol::ProtocolError),

    #[error("{0}")]
    Query(#[from] QueryError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SSH authentication failed for user {0}")]
    SshAuthFailed(String),

    #[error("file transfer incomplete: received {received} of {expected} bytes")]
    ShortTransfer { expected: u64, received: u64 },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::ShortTransfer { .. } => true,
            ClientError::Query(e) => e.is_flood(),
            _ => false,
        }
    }

    /// Returns the server status if the server rejected the command.
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            ClientError::Query(e) => Some(e),
            _ => None,
        }
    }
}
