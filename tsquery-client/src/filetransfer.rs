//! File transfer sessions.
//!
//! A transfer is authorized by a key obtained from `ftinitupload` or
//! `ftinitdownload` on the query connection. Each session opens its own TCP
//! connection to the transfer port, writes the key, then streams raw bytes.
//! Sessions share nothing with the query connection or with each other.

use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default inactivity timeout: the longest a transfer may go without
/// moving a byte.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(8);

/// I/O chunk size (64 KiB).
const CHUNK_SIZE: usize = 64 * 1024;

/// One-shot file transfer against a transfer port.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    host: String,
    port: u16,
    timeout: Duration,
}

impl FileTransfer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Uploads `data`. Resolves once every byte is written and the server
    /// has closed the connection.
    pub async fn upload(&self, key: &str, data: &[u8]) -> Result<(), ClientError> {
        let mut stream = self.open().await?;
        self.idle(stream.write_all(key.as_bytes())).await?;
        for chunk in data.chunks(CHUNK_SIZE) {
            self.idle(stream.write_all(chunk)).await?;
        }
        self.idle(stream.flush()).await?;
        self.idle(stream.shutdown()).await?;

        // wait for the server to hang up
        let mut sink = [0u8; 256];
        while self.idle(stream.read(&mut sink)).await? > 0 {}
        tracing::debug!("uploaded {} bytes to {}:{}", data.len(), self.host, self.port);
        Ok(())
    }

    /// Downloads `size` bytes. Fails with `ShortTransfer` if the server
    /// closes early.
    pub async fn download(&self, key: &str, size: u64) -> Result<Bytes, ClientError> {
        let mut stream = self.open().await?;
        self.idle(stream.write_all(key.as_bytes())).await?;
        self.idle(stream.flush()).await?;

        let expected = usize::try_from(size).unwrap_or(usize::MAX);
        let mut data = BytesMut::with_capacity(expected.min(CHUNK_SIZE * 16));
        let mut chunk = vec![0u8; CHUNK_SIZE];
        while data.len() < expected {
            let want = (expected - data.len()).min(CHUNK_SIZE);
            let n = self.idle(stream.read(&mut chunk[..want])).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
        }

        if (data.len() as u64) < size {
            return Err(ClientError::ShortTransfer {
                expected: size,
                received: data.len() as u64,
            });
        }
        tracing::debug!(
            "downloaded {} bytes from {}:{}",
            data.len(),
            self.host,
            self.port
        );
        Ok(data.freeze())
    }

    async fn open(&self) -> Result<TcpStream, ClientError> {
        let stream = self
            .idle(TcpStream::connect((self.host.as_str(), self.port)))
            .await?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    /// Runs one socket operation under the inactivity timeout.
    async fn idle<T>(
        &self,
        op: impl Future<Output = std::io::Result<T>>,
    ) -> Result<T, ClientError> {
        let result = tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| ClientError::Timeout)?;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_upload_writes_key_then_payload() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let ft = FileTransfer::new("127.0.0.1", port);
        ft.upload("ftkey123", b"hello world").await.unwrap();
        assert_eq!(server.await.unwrap(), b"ftkey123hello world");
    }

    #[tokio::test]
    async fn test_download_reads_announced_size() {
        let (listener, port) = listener().await;
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut key = [0u8; 6];
            socket.read_exact(&mut key).await.unwrap();
            assert_eq!(&key, b"dlkey1");
            socket.write_all(&payload).await.unwrap();
            // keep the socket open: the client stops at the announced size
            let mut rest = Vec::new();
            socket.read_to_end(&mut rest).await.unwrap();
        });

        let ft = FileTransfer::new("127.0.0.1", port);
        let data = ft.download("dlkey1", expected.len() as u64).await.unwrap();
        assert_eq!(data.as_ref(), expected.as_slice());
        server.abort();
    }

    #[tokio::test]
    async fn test_download_short_read_fails() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut key = [0u8; 3];
            socket.read_exact(&mut key).await.unwrap();
            socket.write_all(b"partial").await.unwrap();
        });

        let ft = FileTransfer::new("127.0.0.1", port);
        let err = ft.download("key", 100).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ShortTransfer {
                expected: 100,
                received: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_download_times_out() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let ft = FileTransfer::new("127.0.0.1", port).with_timeout(Duration::from_millis(100));
        assert!(matches!(
            ft.download("key", 10).await,
            Err(ClientError::Timeout)
        ));
        server.abort();
    }

    #[tokio::test]
    async fn test_slow_but_steady_download_completes() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut key = [0u8; 4];
            socket.read_exact(&mut key).await.unwrap();
            for i in 0..10u8 {
                tokio::time::sleep(Duration::from_millis(40)).await;
                socket.write_all(&[i; 10]).await.unwrap();
            }
        });

        // the whole transfer takes longer than the timeout, but no gap does
        let ft = FileTransfer::new("127.0.0.1", port).with_timeout(Duration::from_millis(150));
        let data = ft.download("slow", 100).await.unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(data[99], 9);
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut key = [0u8; 2];
                    socket.read_exact(&mut key).await.unwrap();
                    socket.write_all(&key).await.unwrap();
                });
            }
        });

        let ft = FileTransfer::new("127.0.0.1", port);
        let (a, b) = tokio::join!(ft.download("k1", 2), ft.download("k2", 2));
        assert_eq!(a.unwrap().as_ref(), b"k1");
        assert_eq!(b.unwrap().as_ref(), b"k2");
    }
}
