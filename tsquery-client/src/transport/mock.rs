//! In-memory transport for driving the engine without a server.

use super::Transport;
use crate::error::ClientError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tsquery_protocol::KEEP_ALIVE_FRAME;

/// Client side of an in-memory connection.
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    closed: bool,
}

/// Server side of an in-memory connection.
pub struct MockServer {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// Creates a connected transport/server pair.
pub fn pair() -> (MockTransport, MockServer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    (
        MockTransport {
            inbound,
            outbound,
            closed: false,
        },
        MockServer {
            to_client: Some(to_client),
            from_client,
        },
    )
}

impl MockServer {
    /// Queues a line for the client to read.
    pub fn push(&self, line: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(line.into());
        }
    }

    /// Queues several lines.
    pub fn push_all<I, L>(&self, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        for line in lines {
            self.push(line);
        }
    }

    /// Waits for the next line the client wrote (without terminator).
    /// Keep-alive frames show up as a single space.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Returns a written line if one is already available.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Simulates the server hanging up.
    pub fn close(&mut self) {
        self.to_client.take();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        self.outbound
            .send(line.to_string())
            .map_err(|_| ClientError::ConnectionClosed)
    }

    async fn send_keep_alive(&mut self) -> Result<(), ClientError> {
        self.send(KEEP_ALIVE_FRAME).await
    }

    async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.closed = true;
        self.inbound.close();
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}
