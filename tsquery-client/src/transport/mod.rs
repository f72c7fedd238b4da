//! Transports carrying query lines.
//!
//! A transport moves whole lines: `send` appends the terminator, `read_line`
//! yields one trimmed line at a time and `None` once the peer is gone. The
//! engine polls `read_line` inside `select!`, so implementations must not lose
//! buffered data when the future is dropped before completion.

mod raw;
mod ssh;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use raw::{LineStream, RawTransport};
pub use ssh::SshTransport;

use crate::config::{ConnectionConfig, QueryProtocol};
use crate::error::ClientError;
use async_trait::async_trait;

/// A bidirectional line channel to the query interface.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Writes one line followed by the terminator.
    async fn send(&mut self, line: &str) -> Result<(), ClientError>;

    /// Writes the keep-alive frame.
    async fn send_keep_alive(&mut self) -> Result<(), ClientError>;

    /// Reads the next line. Returns `None` when the peer closed the stream.
    async fn read_line(&mut self) -> Result<Option<String>, ClientError>;

    /// Closes the transport. Safe to call more than once.
    async fn close(&mut self) -> Result<(), ClientError>;

    /// Name of the transport for logging.
    fn kind(&self) -> &'static str;
}

/// Transport selected from a [`ConnectionConfig`].
pub enum QueryTransport {
    Raw(RawTransport),
    Ssh(Box<SshTransport>),
}

impl QueryTransport {
    /// Opens the transport the configuration asks for.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let port = config.port();
        match config.protocol {
            QueryProtocol::Raw => Ok(QueryTransport::Raw(
                RawTransport::connect(&config.host, port).await?,
            )),
            QueryProtocol::Ssh => {
                let username = config.username.as_deref().unwrap_or_default();
                let password = config.password.as_deref().unwrap_or_default();
                let transport = SshTransport::connect(
                    &config.host,
                    port,
                    username,
                    password,
                    config.ssh_host_key_fingerprint.clone(),
                )
                .await?;
                Ok(QueryTransport::Ssh(Box::new(transport)))
            }
        }
    }
}

#[async_trait]
impl Transport for QueryTransport {
    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        match self {
            QueryTransport::Raw(t) => t.send(line).await,
            QueryTransport::Ssh(t) => t.send(line).await,
        }
    }

    async fn send_keep_alive(&mut self) -> Result<(), ClientError> {
        match self {
            QueryTransport::Raw(t) => t.send_keep_alive().await,
            QueryTransport::Ssh(t) => t.send_keep_alive().await,
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        match self {
            QueryTransport::Raw(t) => t.read_line().await,
            QueryTransport::Ssh(t) => t.read_line().await,
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        match self {
            QueryTransport::Raw(t) => t.close().await,
            QueryTransport::Ssh(t) => t.close().await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            QueryTransport::Raw(t) => t.kind(),
            QueryTransport::Ssh(t) => t.kind(),
        }
    }
}
