//! Events published by a query connection.

use serde::Serialize;
use tsquery_protocol::{Notification, QueryError};

/// Lifecycle of a query connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected yet.
    Idle,
    /// Transport is up, greeting lines are being consumed.
    Connecting,
    /// Greeting consumed, commands are flowing.
    Ready,
    /// Transport closed. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Direction of a traced wire line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugKind {
    Send,
    Receive,
    KeepAlive,
}

/// One line as it was written or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugEvent {
    pub kind: DebugKind,
    pub data: String,
}

/// Event broadcast to every subscriber of a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    /// Transport connected.
    Connect,
    /// Greeting consumed and login bootstrap finished.
    Ready,
    /// Transport closed. Carries the last status seen if it was a failure.
    Close { error: Option<QueryError> },
    /// Transport level failure.
    Error { message: String },
    /// Raw wire traffic.
    Debug(DebugEvent),
    /// Server reported flooding. The affected command will be resent.
    Flooding(QueryError),
    /// Server pushed a notification.
    Notification(Notification),
}

impl QueryEvent {
    /// Short name used for logging and filtering.
    pub fn name(&self) -> &'static str {
        match self {
            QueryEvent::Connect => "connect",
            QueryEvent::Ready => "ready",
            QueryEvent::Close { .. } => "close",
            QueryEvent::Error { .. } => "error",
            QueryEvent::Debug(_) => "debug",
            QueryEvent::Flooding(_) => "flooding",
            QueryEvent::Notification(_) => "notification",
        }
    }
}
