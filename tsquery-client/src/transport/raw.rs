//! Plain TCP transport.

use super::Transport;
use crate::error::ClientError;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tsquery_protocol::{LineDecoder, KEEP_ALIVE_FRAME, LINE_TERMINATOR};

/// Default read buffer size (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Line framing over any byte stream.
pub struct LineStream<S> {
    stream: S,
    decoder: LineDecoder,
    buf: Vec<u8>,
    closed: bool,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: LineDecoder::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
            closed: false,
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let mut data = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(LINE_TERMINATOR.as_bytes());
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            // Buffered lines first; the only await point below is `read`.
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }
            if self.closed {
                return Ok(None);
            }

            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                if self.decoder.buffered() > 0 {
                    tracing::debug!(
                        "discarding {} bytes of unterminated data at EOF",
                        self.decoder.buffered()
                    );
                    self.decoder.clear();
                }
                self.closed = true;
                return Ok(None);
            }
            self.decoder.extend(&self.buf[..n]);
        }
    }

    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Query connection over a plain TCP socket.
pub struct RawTransport {
    lines: LineStream<TcpStream>,
}

impl RawTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        tracing::debug!("connecting to {}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        tracing::debug!("TCP connected to {}:{}", host, port);
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            lines: LineStream::new(stream),
        }
    }
}

#[async_trait]
impl Transport for RawTransport {
    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        self.lines.write_line(line).await
    }

    async fn send_keep_alive(&mut self) -> Result<(), ClientError> {
        self.lines.write_line(KEEP_ALIVE_FRAME).await
    }

    async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        self.lines.read_line().await
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.lines.shutdown().await
    }

    fn kind(&self) -> &'static str {
        "raw"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_line_stream_reads_split_segments() {
        let mock = tokio_test::io::Builder::new()
            .read(b"TS3\n\rWelcome")
            .read(b" to the ServerQuery interface.\n\r")
            .read(b"error id=0 msg=ok\n\r")
            .build();
        let mut lines = LineStream::new(mock);

        assert_eq!(lines.read_line().await.unwrap().as_deref(), Some("TS3"));
        assert_eq!(
            lines.read_line().await.unwrap().as_deref(),
            Some("Welcome to the ServerQuery interface.")
        );
        assert_eq!(
            lines.read_line().await.unwrap().as_deref(),
            Some("error id=0 msg=ok")
        );
        assert_eq!(lines.read_line().await.unwrap(), None);
        // stays closed
        assert_eq!(lines.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_stream_writes_terminator() {
        let mock = tokio_test::io::Builder::new()
            .write(b"whoami\n")
            .write(b" \n")
            .build();
        let mut lines = LineStream::new(mock);
        lines.write_line("whoami").await.unwrap();
        lines.write_line(KEEP_ALIVE_FRAME).await.unwrap();
    }

    #[tokio::test]
    async fn test_line_stream_drops_partial_line_at_eof() {
        let mock = tokio_test::io::Builder::new()
            .read(b"error id=0 msg=ok\nerror id=")
            .build();
        let mut lines = LineStream::new(mock);
        assert!(lines.read_line().await.unwrap().is_some());
        assert_eq!(lines.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_raw_transport_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"TS3\n\r").await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"version\n");
            socket
                .write_all(b"version=3.13.7 platform=Linux\n\rerror id=0 msg=ok\n\r")
                .await
                .unwrap();
        });

        let mut transport = RawTransport::connect("127.0.0.1", port).await.unwrap();
        assert_eq!(transport.kind(), "raw");
        assert_eq!(transport.read_line().await.unwrap().as_deref(), Some("TS3"));
        transport.send("version").await.unwrap();
        assert_eq!(
            transport.read_line().await.unwrap().as_deref(),
            Some("version=3.13.7 platform=Linux")
        );
        assert_eq!(
            transport.read_line().await.unwrap().as_deref(),
            Some("error id=0 msg=ok")
        );
        server.await.unwrap();
        assert_eq!(transport.read_line().await.unwrap(), None);
        transport.close().await.unwrap();
    }
}
