//! # tsquery-client
//!
//! Async client for the ServerQuery administration protocol.
//!
//! This crate provides:
//! - A query engine that serializes commands over one connection
//! - Notification delivery with duplicate suppression
//! - Flood-control retry and idle keep-alive
//! - Raw TCP and SSH transports
//! - File transfer sessions on auxiliary connections

pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod event;
pub mod filetransfer;
pub mod transport;

pub use client::QueryClient;
pub use config::{ConfigError, ConnectionConfig, QueryProtocol};
pub use engine::{CommandResult, FLOOD_RETRY_MARGIN};
pub use error::ClientError;
pub use event::{ConnectionState, DebugEvent, DebugKind, QueryEvent};
pub use filetransfer::FileTransfer;
pub use transport::{QueryTransport, Transport};
pub use tsquery_protocol::{Command, Notification, QueryError, Record, Value};
