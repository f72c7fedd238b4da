//! Query engine.
//!
//! The engine is a single task that exclusively owns the transport. Callers
//! talk to it through an unbounded request channel and get their result back
//! on a oneshot; everything the server pushes on its own is published on a
//! broadcast channel. Because one task performs every state transition the
//! queue, the active command and the timers need no locking.

use crate::error::ClientError;
use crate::event::{ConnectionState, DebugEvent, DebugKind, QueryEvent};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tsquery_protocol::notification::is_duplicate_prone;
use tsquery_protocol::{
    is_notification_line, is_status_line, parse_records, Notification, QueryError, Record,
    KEEP_ALIVE_FRAME,
};

/// Extra delay added on top of the cooldown the server asks for.
pub const FLOOD_RETRY_MARGIN: Duration = Duration::from_millis(100);

/// Deadline used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400);

/// Result delivered to the caller of `execute`.
pub type CommandResult = Result<Vec<Record>, ClientError>;

/// A command waiting for (or holding) the wire.
pub(crate) struct QueueItem {
    name: String,
    wire: String,
    lines: Vec<String>,
    reply: oneshot::Sender<CommandResult>,
}

impl QueueItem {
    pub(crate) fn new(
        name: impl Into<String>,
        wire: impl Into<String>,
        reply: oneshot::Sender<CommandResult>,
    ) -> Self {
        Self {
            name: name.into(),
            wire: wire.into(),
            lines: Vec::new(),
            reply,
        }
    }

    pub(crate) fn reject(self, error: ClientError) {
        self.resolve(Err(error));
    }

    fn resolve(self, result: CommandResult) {
        if self.reply.send(result).is_err() {
            tracing::debug!("caller of {} is gone, dropping result", self.name);
        }
    }
}

/// Messages from client handles to the engine task.
pub(crate) enum EngineRequest {
    Execute(QueueItem),
    Quit,
}

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub(crate) struct EngineSettings {
    pub banner_lines: usize,
    pub keep_alive_interval: Option<Duration>,
    /// Shared with the client handle so toggling takes effect for the very
    /// next line read.
    pub suppress_duplicates: Arc<AtomicBool>,
}

pub(crate) struct QueryEngine<T: Transport> {
    transport: T,
    requests: mpsc::UnboundedReceiver<EngineRequest>,
    events: broadcast::Sender<QueryEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    queue: VecDeque<QueueItem>,
    active: Option<QueueItem>,
    banner_remaining: usize,
    last_line: Option<String>,
    last_event: Option<String>,
    suppress_duplicates: Arc<AtomicBool>,
    keep_alive_interval: Option<Duration>,
    flood_deadline: Option<Instant>,
    keep_alive_deadline: Option<Instant>,
}

impl<T: Transport> QueryEngine<T> {
    pub(crate) fn new(
        transport: T,
        settings: EngineSettings,
        requests: mpsc::UnboundedReceiver<EngineRequest>,
        events: broadcast::Sender<QueryEvent>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            transport,
            requests,
            events,
            state,
            queue: VecDeque::new(),
            active: None,
            banner_remaining: settings.banner_lines,
            last_line: None,
            last_event: None,
            suppress_duplicates: settings.suppress_duplicates,
            keep_alive_interval: settings.keep_alive_interval,
            flood_deadline: None,
            keep_alive_deadline: None,
        }
    }

    /// Queues a command ahead of anything arriving on the request channel.
    pub(crate) fn enqueue(&mut self, item: QueueItem) {
        self.queue.push_back(item);
    }

    /// Runs until the transport closes or a quit is requested.
    pub(crate) async fn run(mut self) {
        tracing::debug!("query engine started on {} transport", self.transport.kind());
        self.state.send_replace(ConnectionState::Connecting);

        let failure = match self.start().await {
            Ok(()) => self.event_loop().await,
            Err(e) => Some(e),
        };

        self.shutdown(failure).await;
    }

    async fn start(&mut self) -> Result<(), ClientError> {
        if self.banner_remaining == 0 {
            self.mark_ready().await?;
        }
        Ok(())
    }

    async fn event_loop(&mut self) -> Option<ClientError> {
        loop {
            let result = tokio::select! {
                line = self.transport.read_line() => match line {
                    Ok(Some(line)) => self.handle_line(line).await,
                    Ok(None) => {
                        tracing::debug!("transport reached EOF");
                        return None;
                    }
                    Err(e) => Err(e),
                },
                request = self.requests.recv() => match request {
                    Some(EngineRequest::Execute(item)) => {
                        tracing::trace!("queued {}", item.name);
                        self.queue.push_back(item);
                        self.drain().await
                    }
                    Some(EngineRequest::Quit) | None => {
                        tracing::debug!("quit requested");
                        return None;
                    }
                },
                _ = sleep_until_opt(self.flood_deadline) => {
                    self.flood_deadline = None;
                    self.retransmit().await
                }
                _ = sleep_until_opt(self.keep_alive_deadline) => {
                    self.keep_alive_deadline = None;
                    self.keep_alive().await
                }
            };

            if let Err(e) = result {
                return Some(e);
            }
        }
    }

    async fn handle_line(&mut self, line: String) -> Result<(), ClientError> {
        if line.is_empty() {
            return Ok(());
        }
        self.emit(QueryEvent::Debug(DebugEvent {
            kind: DebugKind::Receive,
            data: line.clone(),
        }));
        self.last_line = Some(line.clone());

        if self.banner_remaining > 0 && !is_status_line(&line) {
            self.banner_remaining -= 1;
            tracing::debug!("greeting: {}", line);
            if self.banner_remaining == 0 {
                self.mark_ready().await?;
            }
            return Ok(());
        }

        if is_status_line(&line) {
            self.finalize(&line).await
        } else if is_notification_line(&line) {
            self.handle_notification(line);
            Ok(())
        } else {
            match self.active.as_mut() {
                Some(item) => item.lines.push(line),
                None => tracing::warn!("unexpected line with no active command: {}", line),
            }
            Ok(())
        }
    }

    async fn mark_ready(&mut self) -> Result<(), ClientError> {
        self.state.send_replace(ConnectionState::Ready);
        tracing::debug!("greeting consumed, connection ready");
        self.arm_keep_alive();
        self.drain().await
    }

    async fn finalize(&mut self, line: &str) -> Result<(), ClientError> {
        let status = match QueryError::parse(line) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("malformed status line {:?}: {}", line, e);
                if let Some(item) = self.active.take() {
                    self.last_line = None;
                    item.resolve(Err(e.into()));
                }
                return self.drain().await;
            }
        };

        let Some(item) = self.active.as_mut() else {
            tracing::debug!("status line with no active command: {}", line);
            return Ok(());
        };
        // consumed by a command, so it cannot explain a later close
        self.last_line = None;

        if status.is_flood() {
            let delay = status.flood_cooldown().saturating_add(FLOOD_RETRY_MARGIN);
            tracing::warn!(
                "flood protection on {}, retrying in {}ms",
                item.name,
                delay.as_millis()
            );
            item.lines.clear();
            self.flood_deadline = Some(deadline_after(delay));
            self.emit(QueryEvent::Flooding(status));
            return Ok(());
        }

        if let Some(item) = self.active.take() {
            let result = if status.is_ok() {
                Ok(item.lines.iter().flat_map(|l| parse_records(l)).collect())
            } else {
                tracing::debug!("{} failed: {}", item.name, status);
                Err(ClientError::Query(status))
            };
            item.resolve(result);
        }
        self.drain().await
    }

    fn handle_notification(&mut self, line: String) {
        if self.suppress_duplicates.load(Ordering::Relaxed)
            && is_duplicate_prone(&line)
            && self.last_event.as_deref() == Some(line.as_str())
        {
            tracing::trace!("suppressing duplicate notification");
            return;
        }

        match Notification::parse(&line) {
            Ok(notification) => self.emit(QueryEvent::Notification(notification)),
            Err(e) => tracing::warn!("dropping malformed notification: {}", e),
        }
        self.last_event = Some(line);
    }

    /// Sends the queue head if the connection is ready and the wire is free.
    async fn drain(&mut self) -> Result<(), ClientError> {
        if *self.state.borrow() != ConnectionState::Ready || self.active.is_some() {
            return Ok(());
        }
        let Some(item) = self.queue.pop_front() else {
            return Ok(());
        };

        let wire = item.wire.clone();
        self.active = Some(item);
        self.send(&wire).await
    }

    async fn retransmit(&mut self) -> Result<(), ClientError> {
        let Some(wire) = self.active.as_ref().map(|item| item.wire.clone()) else {
            return Ok(());
        };
        tracing::debug!("retransmitting after flood cooldown");
        self.send(&wire).await
    }

    async fn send(&mut self, wire: &str) -> Result<(), ClientError> {
        self.emit(QueryEvent::Debug(DebugEvent {
            kind: DebugKind::Send,
            data: wire.to_string(),
        }));
        self.transport.send(wire).await?;
        self.arm_keep_alive();
        Ok(())
    }

    async fn keep_alive(&mut self) -> Result<(), ClientError> {
        self.emit(QueryEvent::Debug(DebugEvent {
            kind: DebugKind::KeepAlive,
            data: KEEP_ALIVE_FRAME.to_string(),
        }));
        self.transport.send_keep_alive().await?;
        self.arm_keep_alive();
        Ok(())
    }

    fn arm_keep_alive(&mut self) {
        self.keep_alive_deadline = self
            .keep_alive_interval
            .map(deadline_after);
    }

    fn emit(&self, event: QueryEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn shutdown(&mut self, failure: Option<ClientError>) {
        self.flood_deadline = None;
        self.keep_alive_deadline = None;

        if let Some(e) = &failure {
            tracing::warn!("query connection failed: {}", e);
            self.emit(QueryEvent::Error {
                message: e.to_string(),
            });
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("error while closing transport: {}", e);
        }

        self.state.send_replace(ConnectionState::Closed);

        // Requests that raced the close are settled too.
        self.requests.close();
        let mut rejected = 0usize;
        if let Some(item) = self.active.take() {
            item.reject(ClientError::ConnectionClosed);
            rejected += 1;
        }
        for item in self.queue.drain(..) {
            item.reject(ClientError::ConnectionClosed);
            rejected += 1;
        }
        while let Ok(request) = self.requests.try_recv() {
            if let EngineRequest::Execute(item) = request {
                item.reject(ClientError::ConnectionClosed);
                rejected += 1;
            }
        }
        if rejected > 0 {
            tracing::debug!("rejected {} pending commands", rejected);
        }

        let error = self
            .last_line
            .as_deref()
            .filter(|line| is_status_line(line))
            .and_then(|line| QueryError::parse(line).ok())
            .filter(|status| !status.is_ok());
        tracing::info!("query connection closed");
        self.emit(QueryEvent::Close { error });
    }
}

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Sleeps until the deadline, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
