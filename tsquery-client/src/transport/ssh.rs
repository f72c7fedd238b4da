//! SSH transport: the query interface on the shell channel of an SSH session.

use super::Transport;
use crate::error::ClientError;
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;
use tsquery_protocol::{LineDecoder, KEEP_ALIVE_FRAME, LINE_TERMINATOR};

/// Host key policy for the query SSH session.
pub struct SshClientHandler {
    expected_fingerprint: Option<String>,
}

impl SshClientHandler {
    /// `expected_fingerprint` is the base64 SHA-256 fingerprint, with or
    /// without the `SHA256:` prefix. `None` accepts any key.
    pub fn new(expected_fingerprint: Option<String>) -> Self {
        Self {
            expected_fingerprint,
        }
    }

    fn accepts(&self, fingerprint: &str) -> bool {
        match &self.expected_fingerprint {
            Some(expected) => {
                let accepted = expected.trim_start_matches("SHA256:") == fingerprint;
                if !accepted {
                    tracing::warn!(
                        "SSH host key mismatch: expected {}, got SHA256:{}",
                        expected,
                        fingerprint
                    );
                }
                accepted
            }
            None => {
                tracing::warn!("accepting unpinned SSH host key SHA256:{}", fingerprint);
                true
            }
        }
    }
}

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<(Self, bool), Self::Error> {
        let accepted = self.accepts(&server_public_key.fingerprint());
        Ok((self, accepted))
    }
}

/// Query connection over SSH.
pub struct SshTransport {
    handle: Handle<SshClientHandler>,
    channel: Channel<Msg>,
    decoder: LineDecoder,
    closed: bool,
}

impl SshTransport {
    /// Connects, authenticates with a password and opens an interactive shell.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        expected_fingerprint: Option<String>,
    ) -> Result<Self, ClientError> {
        tracing::debug!("connecting to {}:{} over SSH", host, port);
        let config = Arc::new(client::Config::default());
        let handler = SshClientHandler::new(expected_fingerprint);

        let mut handle = client::connect(config, (host, port), handler).await?;
        if !handle.authenticate_password(username, password).await? {
            return Err(ClientError::SshAuthFailed(username.to_string()));
        }
        tracing::debug!("SSH authenticated as {}", username);

        let channel = handle.channel_open_session().await?;
        channel.request_shell(true).await?;
        tracing::debug!("SSH shell channel open");

        Ok(Self {
            handle,
            channel,
            decoder: LineDecoder::new(),
            closed: false,
        })
    }

    async fn write(&mut self, line: &str) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let data = format!("{}{}", line, LINE_TERMINATOR);
        self.channel.data(data.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        self.write(line).await
    }

    async fn send_keep_alive(&mut self) -> Result<(), ClientError> {
        self.write(KEEP_ALIVE_FRAME).await
    }

    async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }
            if self.closed {
                return Ok(None);
            }

            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.decoder.extend(&data),
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    tracing::debug!(
                        "ignoring {} bytes of extended data (stream {})",
                        data.len(),
                        ext
                    );
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    self.decoder.clear();
                    return Ok(None);
                }
                Some(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.eof().await.ok();
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;
    use russh_keys::key::{KeyPair, PublicKey};

    fn host_key() -> PublicKey {
        KeyPair::generate_ed25519()
            .unwrap()
            .clone_public_key()
            .unwrap()
    }

    async fn check(expected: Option<&str>, key: &PublicKey) -> bool {
        let handler = SshClientHandler::new(expected.map(str::to_string));
        let (_, accepted) = handler.check_server_key(key).await.unwrap();
        accepted
    }

    #[tokio::test]
    async fn test_pinned_fingerprint_matches() {
        let key = host_key();
        let fingerprint = key.fingerprint();
        assert!(check(Some(&fingerprint), &key).await);
        assert!(check(Some(&format!("SHA256:{}", fingerprint)), &key).await);
    }

    #[tokio::test]
    async fn test_pinned_fingerprint_mismatch_is_rejected() {
        let key = host_key();
        let other = host_key();
        assert!(!check(Some(&other.fingerprint()), &key).await);
        assert!(!check(Some("SHA256:"), &key).await);
    }

    #[tokio::test]
    async fn test_unpinned_accepts_any_key() {
        assert!(check(None, &host_key()).await);
    }
}
