//! High-level client API.

use crate::config::{ConnectionConfig, QueryProtocol};
use crate::engine::{CommandResult, EngineRequest, EngineSettings, QueryEngine, QueueItem};
use crate::error::ClientError;
use crate::event::{ConnectionState, QueryEvent};
use crate::filetransfer::FileTransfer;
use crate::transport::{QueryTransport, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tsquery_protocol::{Command, Record};

/// Default capacity for the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    config: ConnectionConfig,
    requests: mpsc::UnboundedSender<EngineRequest>,
    /// Receiving side of `requests`, handed to the engine on connect.
    pending: Mutex<Option<mpsc::UnboundedReceiver<EngineRequest>>>,
    events: broadcast::Sender<QueryEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    suppress_duplicates: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one query connection. Cheap to clone.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl QueryClient {
    /// Creates a new client with the given configuration. Nothing is opened
    /// until [`connect`](Self::connect).
    pub fn new(config: ConnectionConfig) -> Self {
        let (requests, pending) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let suppress_duplicates = Arc::new(AtomicBool::new(config.suppress_duplicate_events));
        Self {
            inner: Arc::new(Inner {
                config,
                requests,
                pending: Mutex::new(Some(pending)),
                events,
                state: Arc::new(state),
                suppress_duplicates,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Opens the configured transport, consumes the greeting and runs the
    /// login bootstrap.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.config.validate()?;
        let requests = self.take_requests()?;

        let config = &self.inner.config;
        tracing::debug!(
            "connecting to {}:{} ({})",
            config.host,
            config.port(),
            config.protocol
        );
        let transport =
            match tokio::time::timeout(config.connect_timeout(), QueryTransport::connect(config))
                .await
            {
                Ok(Ok(transport)) => transport,
                Ok(Err(e)) => {
                    tracing::debug!("connection failed: {}", e);
                    *self.inner.pending.lock() = Some(requests);
                    return Err(e);
                }
                Err(_) => {
                    tracing::debug!("connection timeout");
                    *self.inner.pending.lock() = Some(requests);
                    return Err(ClientError::Timeout);
                }
            };

        self.start(transport, requests).await
    }

    /// Runs the connection over an already opened transport.
    pub async fn connect_with<T: Transport>(&self, transport: T) -> Result<(), ClientError> {
        let requests = self.take_requests()?;
        self.start(transport, requests).await
    }

    fn take_requests(&self) -> Result<mpsc::UnboundedReceiver<EngineRequest>, ClientError> {
        self.inner
            .pending
            .lock()
            .take()
            .ok_or(ClientError::AlreadyConnected)
    }

    async fn start<T: Transport>(
        &self,
        transport: T,
        requests: mpsc::UnboundedReceiver<EngineRequest>,
    ) -> Result<(), ClientError> {
        let config = &self.inner.config;
        let _ = self.inner.events.send(QueryEvent::Connect);

        let settings = EngineSettings {
            banner_lines: config.banner_lines,
            keep_alive_interval: config.keep_alive.then(|| config.keep_alive_interval()),
            suppress_duplicates: self.inner.suppress_duplicates.clone(),
        };
        let mut engine = QueryEngine::new(
            transport,
            settings,
            requests,
            self.inner.events.clone(),
            self.inner.state.clone(),
        );

        // Bootstrap commands go ahead of anything queued before connect.
        let mut replies = Vec::new();
        for command in self.bootstrap_commands() {
            let (tx, rx) = oneshot::channel();
            engine.enqueue(QueueItem::new(command.name(), command.encode(), tx));
            replies.push((command.name().to_string(), rx));
        }

        let mut state = self.inner.state.subscribe();
        *self.inner.task.lock() = Some(tokio::spawn(engine.run()));

        let ready = tokio::time::timeout(config.connect_timeout(), async {
            let reached = state
                .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Closed))
                .await
                .map(|s| *s)
                .map_err(|_| ClientError::ConnectionClosed)?;
            if reached.is_closed() {
                return Err(ClientError::ConnectionClosed);
            }
            for (name, reply) in replies {
                reply.await.map_err(|_| ClientError::ConnectionClosed)??;
                tracing::debug!("bootstrap {} ok", name);
            }
            Ok(())
        })
        .await;

        let result = match ready {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };
        if let Err(e) = result {
            tracing::debug!("connection setup failed: {}", e);
            self.force_quit().await;
            return Err(e);
        }

        let _ = self.inner.events.send(QueryEvent::Ready);
        tracing::info!("query connection ready");
        Ok(())
    }

    fn bootstrap_commands(&self) -> Vec<Command> {
        let config = &self.inner.config;
        let mut commands = Vec::new();

        if config.protocol == QueryProtocol::Raw {
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                commands.push(
                    Command::new("login")
                        .arg("client_login_name", username)
                        .arg("client_login_password", password),
                );
            }
        }

        if let Some(port) = config.server_port {
            commands.push(
                Command::new("use")
                    .arg("port", port)
                    .arg_opt("client_nickname", config.nickname.as_ref()),
            );
        } else if let Some(nickname) = &config.nickname {
            commands.push(Command::new("clientupdate").arg("client_nickname", nickname));
        }

        commands
    }

    /// Queues a command and waits for its records.
    ///
    /// Commands are sent one at a time in submission order. Commands issued
    /// before `connect` wait until the connection is ready.
    pub async fn execute(&self, command: Command) -> Result<Vec<Record>, ClientError> {
        command.validate()?;
        if self.state().is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel::<CommandResult>();
        let item = QueueItem::new(command.name(), command.encode(), tx);
        self.inner
            .requests
            .send(EngineRequest::Execute(item))
            .map_err(|_| ClientError::ConnectionClosed)?;

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Like [`execute`](Self::execute) but treats "empty result set" as no records.
    pub async fn execute_list(&self, command: Command) -> Result<Vec<Record>, ClientError> {
        match self.execute(command).await {
            Err(ClientError::Query(e)) if e.is_empty_result() => Ok(Vec::new()),
            other => other,
        }
    }

    /// Enables or disables suppression of repeated client view/move notifications.
    /// Applies to every line read after this call returns.
    pub fn set_duplicate_suppression(&self, enabled: bool) {
        self.inner
            .suppress_duplicates
            .store(enabled, Ordering::Relaxed);
    }

    pub fn duplicate_suppression(&self) -> bool {
        self.inner.suppress_duplicates.load(Ordering::Relaxed)
    }

    /// Closes the transport immediately. Pending commands fail with
    /// `ConnectionClosed`.
    pub async fn force_quit(&self) {
        let _ = self.inner.requests.send(EngineRequest::Quit);

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("query engine task failed: {}", e);
                self.inner.state.send_replace(ConnectionState::Closed);
                let _ = self.inner.events.send(QueryEvent::Close { error: None });
            }
            return;
        }

        // Never connected: settle whatever was queued up front.
        let pending = self.inner.pending.lock().take();
        if let Some(mut pending) = pending {
            pending.close();
            while let Ok(request) = pending.try_recv() {
                if let EngineRequest::Execute(item) = request {
                    item.reject(ClientError::ConnectionClosed);
                }
            }
            self.inner.state.send_replace(ConnectionState::Closed);
            let _ = self.inner.events.send(QueryEvent::Close { error: None });
        }
    }

    /// Sends `quit` and waits for the server to hang up. Fails with
    /// `NotConnected` before [`connect`](Self::connect), where nothing would
    /// ever answer; use [`force_quit`](Self::force_quit) there.
    pub async fn quit(&self) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Idle {
            return Err(ClientError::NotConnected);
        }
        let mut state = self.watch_state();
        self.execute(Command::new("quit")).await?;
        tokio::time::timeout(self.inner.config.connect_timeout(), state.wait_for(|s| s.is_closed()))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::ConnectionClosed)?;
        Ok(())
    }

    /// Opens a file transfer session against the configured host.
    pub fn file_transfer(&self, port: u16) -> FileTransfer {
        FileTransfer::new(&self.inner.config.host, port)
            .with_timeout(self.inner.config.file_transfer_timeout())
    }

    // =========================================================================
    // Session helpers
    // =========================================================================

    /// Authenticates the query client.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.execute(
            Command::new("login")
                .arg("client_login_name", username)
                .arg("client_login_password", password),
        )
        .await?;
        Ok(())
    }

    /// Selects a virtual server by voice port.
    pub async fn use_port(&self, port: u16) -> Result<(), ClientError> {
        self.execute(Command::new("use").arg("port", port)).await?;
        Ok(())
    }

    /// Returns information about the query client itself.
    pub async fn whoami(&self) -> Result<Record, ClientError> {
        first(self.execute(Command::new("whoami")).await?)
    }

    /// Returns server version information.
    pub async fn version(&self) -> Result<Record, ClientError> {
        first(self.execute(Command::new("version")).await?)
    }

    /// Registers for one notification family (`server`, `channel`,
    /// `textserver`, `textchannel` or `textprivate`).
    pub async fn register_notifications(
        &self,
        event: &str,
        channel_id: Option<u64>,
    ) -> Result<(), ClientError> {
        self.execute(
            Command::new("servernotifyregister")
                .arg("event", event)
                .arg_opt("id", channel_id),
        )
        .await?;
        Ok(())
    }
}

fn first(records: Vec<Record>) -> Result<Record, ClientError> {
    Ok(records.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{self, MockServer};
    use std::time::Duration;

    fn greeting(server: &MockServer) {
        server.push("TS3");
        server.push("Welcome to the TeamSpeak 3 ServerQuery interface.");
    }

    #[tokio::test]
    async fn test_connect_with_bootstrap_runs_first() {
        let config = ConnectionConfig::default()
            .with_credentials("serveradmin", "p ss")
            .with_server_port(9987)
            .with_nickname("bot")
            .with_keep_alive(false);
        let client = QueryClient::new(config);
        let mut events = client.subscribe();

        // queued before connect, must run after the bootstrap
        let early = {
            let client = client.clone();
            tokio::spawn(async move { client.whoami().await })
        };
        tokio::task::yield_now().await;

        let (transport, mut server) = mock::pair();
        greeting(&server);
        let connecting = {
            let client = client.clone();
            tokio::spawn(async move { client.connect_with(transport).await })
        };

        assert_eq!(
            server.recv().await.as_deref(),
            Some("login client_login_name=serveradmin client_login_password=p\\sss")
        );
        server.push("error id=0 msg=ok");
        assert_eq!(
            server.recv().await.as_deref(),
            Some("use port=9987 client_nickname=bot")
        );
        server.push("error id=0 msg=ok");
        connecting.await.unwrap().unwrap();
        assert!(client.is_ready());

        assert_eq!(server.recv().await.as_deref(), Some("whoami"));
        server.push("virtualserver_status=online client_id=1");
        server.push("error id=0 msg=ok");
        let me = early.await.unwrap().unwrap();
        assert_eq!(me.get_str("virtualserver_status"), Some("online"));

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            if !matches!(event, QueryEvent::Debug(_)) {
                names.push(event.name());
            }
        }
        assert_eq!(names, vec!["connect", "ready"]);
    }

    #[tokio::test]
    async fn test_nickname_without_server_port() {
        let client = QueryClient::new(ConnectionConfig::default().with_nickname("bot"));
        assert_eq!(
            client
                .bootstrap_commands()
                .iter()
                .map(Command::encode)
                .collect::<Vec<_>>(),
            vec!["clientupdate client_nickname=bot".to_string()]
        );

        let ssh = ConnectionConfig::default()
            .with_protocol(QueryProtocol::Ssh)
            .with_credentials("serveradmin", "secret");
        assert!(QueryClient::new(ssh).bootstrap_commands().is_empty());
    }

    #[tokio::test]
    async fn test_failed_login_fails_connect() {
        let config = ConnectionConfig::default()
            .with_credentials("serveradmin", "wrong")
            .with_keep_alive(false);
        let client = QueryClient::new(config);
        let (transport, mut server) = mock::pair();
        greeting(&server);

        let connecting = {
            let client = client.clone();
            tokio::spawn(async move { client.connect_with(transport).await })
        };
        assert!(server.recv().await.is_some());
        server.push("error id=520 msg=invalid\\sloginname\\sor\\spassword");

        let err = connecting.await.unwrap().unwrap_err();
        assert_eq!(err.query_error().map(|e| e.id), Some(520));
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.execute(Command::new("whoami")).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let client = QueryClient::new(ConnectionConfig::default().with_banner_lines(0));
        let (transport, _server) = mock::pair();
        client.connect_with(transport).await.unwrap();

        let (transport, _other) = mock::pair();
        assert!(matches!(
            client.connect_with(transport).await,
            Err(ClientError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn test_force_quit_rejects_and_blocks_execute() {
        let client = QueryClient::new(ConnectionConfig::default().with_banner_lines(0));
        let (transport, mut server) = mock::pair();
        client.connect_with(transport).await.unwrap();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.execute(Command::new("clientlist")).await })
        };
        assert_eq!(server.recv().await.as_deref(), Some("clientlist"));

        client.force_quit().await;
        assert!(matches!(
            pending.await.unwrap(),
            Err(ClientError::ConnectionClosed)
        ));
        assert!(matches!(
            client.execute(Command::new("whoami")).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_force_quit_before_connect() {
        let client = QueryClient::new(ConnectionConfig::default());
        let queued = {
            let client = client.clone();
            tokio::spawn(async move { client.execute(Command::new("whoami")).await })
        };
        tokio::task::yield_now().await;

        client.force_quit().await;
        assert!(matches!(
            queued.await.unwrap(),
            Err(ClientError::ConnectionClosed)
        ));
        assert!(client.state().is_closed());
    }

    #[tokio::test]
    async fn test_execute_validates_command() {
        let client = QueryClient::new(ConnectionConfig::default());
        assert!(matches!(
            client.execute(Command::new("bad name")).await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_list_maps_empty_result() {
        let client = QueryClient::new(ConnectionConfig::default().with_banner_lines(0));
        let (transport, mut server) = mock::pair();
        client.connect_with(transport).await.unwrap();

        let listing = {
            let client = client.clone();
            tokio::spawn(async move { client.execute_list(Command::new("banlist")).await })
        };
        assert_eq!(server.recv().await.as_deref(), Some("banlist"));
        server.push("error id=1281 msg=database\\sempty\\sresult\\sset");
        assert!(listing.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_greeting() {
        let client = QueryClient::new(
            ConnectionConfig::default().with_connect_timeout(Duration::from_secs(2)),
        );
        let (transport, _server) = mock::pair();
        assert!(matches!(
            client.connect_with(transport).await,
            Err(ClientError::Timeout)
        ));
        assert!(client.state().is_closed());
    }

    #[test]
    fn test_file_transfer_uses_config() {
        let mut config = ConnectionConfig::new("ts.example.com");
        config.file_transfer_timeout_secs = 3;
        let client = QueryClient::new(config);
        let ft = client.file_transfer(30033);
        assert_eq!(ft.addr(), ("ts.example.com", 30033));
        assert_eq!(ft.timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_quit_before_connect_is_not_connected() {
        let client = QueryClient::new(ConnectionConfig::default());
        assert!(matches!(
            client.quit().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_suppression_toggle_applies_to_next_lines() {
        let client = QueryClient::new(
            ConnectionConfig::default()
                .with_banner_lines(0)
                .with_keep_alive(false),
        );
        assert!(client.duplicate_suppression());
        let mut events = client.subscribe();
        let (transport, mut server) = mock::pair();
        client.connect_with(transport).await.unwrap();

        client.set_duplicate_suppression(false);
        let moved = "notifyclientmoved ctid=2 reasonid=0 clid=5";
        server.push(moved);
        server.push(moved);

        let reply = {
            let client = client.clone();
            tokio::spawn(async move { client.version().await })
        };
        assert_eq!(server.recv().await.as_deref(), Some("version"));
        server.push("error id=0 msg=ok");
        reply.await.unwrap().unwrap();

        let mut moves = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, QueryEvent::Notification(_)) {
                moves += 1;
            }
        }
        assert_eq!(moves, 2);
    }
}
