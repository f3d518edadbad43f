//! Transport session: one connection to the room server, with handshake and
//! reconnect policy.
//!
//! [`RoomSession`] is a thin handle that talks to a background session loop
//! over an unbounded MPSC channel. Lifecycle and inbound messages are emitted
//! on a bounded channel of [`SessionEvent`]s returned from
//! [`RoomSession::start`].
//!
//! # Handshake
//!
//! 1. The [`Connector`] opens a raw transport ([`SessionEvent::Open`]).
//! 2. The [`TokenProvider`] supplies a short-lived token. Only then is the
//!    session [`Ready`](ConnectionState::Ready) and [`RoomSession::send`]
//!    accepted. Before that, `send` fails with [`RoomSyncError::NotReady`]
//!    instead of queueing.
//!
//! # Reconnect policy
//!
//! Abnormal closures (see [`CloseCode::should_reconnect`]) are retried after
//! `reconnect_base_delay × attempt` while fewer than `max_reconnect_attempts`
//! connections in a row have failed.
//! After that the session enters [`ConnectionState::Failed`] and emits
//! [`SessionEvent::ConnectionError`]; nothing reconnects until a new session
//! is started. A missing token is terminal straight away.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("wss://rooms.example.com");
//! let tokens = StaticTokenProvider::new(token);
//! let (session, mut events) =
//!     RoomSession::start(connector, tokens, Identity::new("u1", "Ada"), SessionConfig::new());
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Ready { .. } = event {
//!         session.send(ClientMessage::GetQueue { space_id: "abc".into() })?;
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::auth::{Identity, TokenProvider};
use crate::close_code::CloseCode;
use crate::error::{Result, RoomSyncError};
use crate::event::SessionEvent;
use crate::protocol::{
    decode_server_frame, encode_client_message, ClientMessage, InboundFrame, SpaceId, UserId,
};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of consecutive reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default base delay; attempt `n` waits `n` times this long.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Default limit for opening one raw connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RoomSession`].
///
/// # Example
///
/// ```
/// use room_sync_client::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_max_reconnect_attempts(5)
///     .with_reconnect_base_delay(Duration::from_secs(1));
/// assert_eq!(config.max_reconnect_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Consecutive failed connections tolerated before the session fails.
    /// A failure is retried only while the count stays below this value, and
    /// the count resets whenever a connection reaches `Ready`.
    /// Defaults to **3**.
    pub max_reconnect_attempts: u32,
    /// Reconnect attempt `n` waits `n × reconnect_base_delay`.
    /// Defaults to **3 seconds**.
    pub reconnect_base_delay: Duration,
    /// Limit for opening one raw connection; expiry counts as an abnormal
    /// closure. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// Inbound messages are dropped (with a warning) when the consumer falls
    /// behind; lifecycle events are always delivered. Defaults to **256**,
    /// values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the session loop gets to close the transport on
    /// [`RoomSession::disconnect`] before it is aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the failure budget. Values of 0 or 1 disable reconnecting.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the reconnect base delay.
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the raw connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay.saturating_mul(attempt)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of the session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Opening a raw connection (initial or reconnect).
    Connecting = 0,
    /// Raw connection open, waiting for a token.
    Open = 1,
    /// Token attached; messages may be sent.
    Ready = 2,
    /// A graceful close is in progress.
    Closing = 3,
    /// Closed without error, or by a non-retryable close code.
    Closed = 4,
    /// Terminal failure that needs user action (no token, retries exhausted).
    Failed = 5,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Ready,
            3 => Self::Closing,
            4 => Self::Closed,
            _ => Self::Failed,
        }
    }

    /// Returns `true` once the session will never become ready again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// State shared between the handle and the session loop.
struct SessionShared {
    state: AtomicU8,
    user_id: UserId,
    room_id: Mutex<Option<SpaceId>>,
}

impl SessionShared {
    fn new(user_id: UserId) -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            user_id,
            room_id: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "session state");
        self.state.store(state as u8, Ordering::Release);
    }
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to a running transport session.
///
/// Created via [`RoomSession::start`]. Every outbound message is enriched
/// with the user id and token by the session loop, so callers only deal in
/// [`ClientMessage`]s.
pub struct RoomSession {
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    shared: Arc<SessionShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<(CloseCode, String)>>,
    shutdown_timeout: Duration,
}

impl RoomSession {
    /// Start the session loop and return a handle plus the event receiver.
    ///
    /// The loop connects immediately. Wait for [`SessionEvent::Ready`] before
    /// sending.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C, P>(
        connector: C,
        tokens: P,
        identity: Identity,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>)
    where
        C: Connector,
        P: TokenProvider,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = Arc::new(SessionShared::new(identity.user_id.clone()));
        let shutdown_timeout = config.shutdown_timeout;

        let session_loop = SessionLoop {
            connector,
            tokens,
            identity,
            config,
            cmd_rx,
            event_tx,
            shared: Arc::clone(&shared),
            shutdown_rx,
            failures: 0,
        };
        let task = tokio::spawn(session_loop.run());

        let session = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (session, event_rx)
    }

    /// Queue a message for the server.
    ///
    /// # Errors
    ///
    /// - [`RoomSyncError::NotReady`] while connecting or before the token is attached
    /// - [`RoomSyncError::NotConnected`] once the session is closed or failed
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        match self.shared.state() {
            ConnectionState::Ready => self
                .cmd_tx
                .send(msg)
                .map_err(|_| RoomSyncError::NotConnected),
            state if state.is_terminal() => Err(RoomSyncError::NotConnected),
            _ => Err(RoomSyncError::NotReady),
        }
    }

    /// Like [`send`](Self::send), reporting only whether the message was accepted.
    pub fn try_send(&self, msg: ClientMessage) -> bool {
        let kind = msg.kind();
        match self.send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!(kind, "message not sent: {e}");
                false
            }
        }
    }

    /// Report a measured round-trip latency to the server.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn report_latency(&self, latency: Duration) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.send(ClientMessage::LatencyReport {
            latency: latency.as_millis() as u64,
            timestamp,
        })
    }

    /// Close the connection with `code` and stop the session loop.
    ///
    /// After this returns the event receiver yields the final
    /// [`SessionEvent::Disconnected`] and then `None`.
    pub async fn disconnect(&mut self, code: CloseCode, reason: &str) {
        debug!(%code, reason, "session disconnect requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send((code, reason.to_owned()));
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        if !self.shared.state().is_terminal() {
            self.shared.set_state(ConnectionState::Closed);
        }
    }

    /// Disconnect with a normal closure.
    pub async fn shutdown(&mut self) {
        self.disconnect(CloseCode::NORMAL, "client shut down").await;
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns `true` if messages can be sent right now.
    pub fn is_ready(&self) -> bool {
        self.shared.state() == ConnectionState::Ready
    }

    /// The local user id injected into outbound frames.
    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    /// The room most recently joined through this session, if any.
    pub async fn current_room_id(&self) -> Option<SpaceId> {
        self.shared.room_id.lock().await.clone()
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("state", &self.connection_state())
            .field("user_id", &self.shared.user_id)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead so
        // the loop and any pending backoff timer die with the handle.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// How one connection ended.
enum ConnectionOutcome {
    /// Local shutdown; stop.
    Shutdown,
    /// Closed by the server or the network.
    Closed { code: CloseCode, reason: String },
    /// Unrecoverable without user action.
    Fatal { reason: String },
}

struct SessionLoop<C, P> {
    connector: C,
    tokens: P,
    identity: Identity,
    config: SessionConfig,
    cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SessionShared>,
    shutdown_rx: oneshot::Receiver<(CloseCode, String)>,
    /// Consecutive failed connections since the last `Ready`; also the
    /// 1-based number of the next reconnect attempt.
    failures: u32,
}

impl<C, P> SessionLoop<C, P>
where
    C: Connector,
    P: TokenProvider,
{
    async fn run(mut self) {
        let mut reconnect = false;

        let final_reason = loop {
            self.shared.set_state(ConnectionState::Connecting);

            let outcome = match self.open_transport().await {
                Some(Ok(transport)) => {
                    self.shared.set_state(ConnectionState::Open);
                    self.emit_lifecycle(SessionEvent::Open).await;
                    self.run_connection(transport, reconnect).await
                }
                Some(Err(e)) => {
                    warn!("connect attempt failed: {e}");
                    ConnectionOutcome::Closed {
                        code: CloseCode::ABNORMAL,
                        reason: e.to_string(),
                    }
                }
                None => ConnectionOutcome::Shutdown,
            };

            match outcome {
                ConnectionOutcome::Shutdown => {
                    self.shared.set_state(ConnectionState::Closed);
                    break Some("client shut down".to_string());
                }
                ConnectionOutcome::Fatal { reason } => {
                    error!("session failed: {reason}");
                    self.shared.set_state(ConnectionState::Failed);
                    self.emit_lifecycle(SessionEvent::ConnectionError {
                        reason: reason.clone(),
                    })
                    .await;
                    break Some(reason);
                }
                ConnectionOutcome::Closed { code, reason } => {
                    if !code.should_reconnect() {
                        info!(%code, "connection closed; not reconnecting");
                        let failed = code == CloseCode::AUTH_FAILURE
                            || code == CloseCode::INVALID_TOKEN;
                        self.emit_lifecycle(SessionEvent::Closed {
                            code,
                            reason: reason.clone(),
                            will_reconnect: false,
                        })
                        .await;
                        if failed {
                            self.shared.set_state(ConnectionState::Failed);
                            self.emit_lifecycle(SessionEvent::ConnectionError {
                                reason: format!("authentication rejected ({code})"),
                            })
                            .await;
                        } else {
                            self.shared.set_state(ConnectionState::Closed);
                        }
                        break Some(reason);
                    }

                    self.failures = self.failures.saturating_add(1);
                    if self.failures >= self.config.max_reconnect_attempts {
                        let exhausted = RoomSyncError::ReconnectExhausted {
                            attempts: self.failures,
                        };
                        error!(%code, "{exhausted}");
                        self.shared.set_state(ConnectionState::Failed);
                        self.emit_lifecycle(SessionEvent::Closed {
                            code,
                            reason,
                            will_reconnect: false,
                        })
                        .await;
                        self.emit_lifecycle(SessionEvent::ConnectionError {
                            reason: exhausted.to_string(),
                        })
                        .await;
                        break Some(exhausted.to_string());
                    }

                    let attempt = self.failures;
                    let delay = self.config.reconnect_delay(attempt);
                    warn!(%code, attempt, ?delay, "connection lost; scheduling reconnect");
                    self.shared.set_state(ConnectionState::Connecting);
                    self.emit_lifecycle(SessionEvent::Closed {
                        code,
                        reason,
                        will_reconnect: true,
                    })
                    .await;
                    self.emit_lifecycle(SessionEvent::Reconnecting { attempt, delay })
                        .await;

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = &mut self.shutdown_rx => {
                            debug!("shutdown during reconnect backoff");
                            self.shared.set_state(ConnectionState::Closed);
                            break Some("client shut down".to_string());
                        }
                    }
                    reconnect = true;
                }
            }
        };

        if self.event_tx.send(SessionEvent::Disconnected { reason: final_reason }).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
        debug!("session loop exited");
    }

    /// Phase one: open a raw transport. `None` means shutdown was requested.
    async fn open_transport(&mut self) -> Option<Result<C::Transport>> {
        let timeout = self.config.connect_timeout;
        tokio::select! {
            res = tokio::time::timeout(timeout, self.connector.connect()) => {
                Some(res.unwrap_or(Err(RoomSyncError::Timeout)))
            }
            _ = &mut self.shutdown_rx => None,
        }
    }

    /// Phase two plus the message pump for one open transport.
    async fn run_connection(
        &mut self,
        mut transport: C::Transport,
        reconnect: bool,
    ) -> ConnectionOutcome {
        let token = tokio::select! {
            res = self.tokens.fetch_token() => res,
            shutdown = &mut self.shutdown_rx => {
                let (code, reason) = shutdown
                    .unwrap_or((CloseCode::NORMAL, "client dropped".to_string()));
                let _ = transport.close(code, &reason).await;
                return ConnectionOutcome::Shutdown;
            }
        };
        let token = match token {
            Ok(token) if !token.trim().is_empty() => token,
            Ok(_) => {
                let _ = transport.close(CloseCode::INVALID_TOKEN, "missing token").await;
                return ConnectionOutcome::Fatal {
                    reason: RoomSyncError::TokenUnavailable("empty token".into()).to_string(),
                };
            }
            Err(e) => {
                let _ = transport.close(CloseCode::INVALID_TOKEN, "missing token").await;
                return ConnectionOutcome::Fatal {
                    reason: e.to_string(),
                };
            }
        };

        // Anything queued against the previous connection is stale.
        let mut stale = 0usize;
        while self.cmd_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "dropped commands queued before reconnect");
        }

        self.failures = 0;
        self.shared.set_state(ConnectionState::Ready);
        info!(user_id = %self.identity.user_id, reconnect, "session ready");
        self.emit_lifecycle(SessionEvent::Ready {
            user_id: self.identity.user_id.clone(),
            reconnect,
        })
        .await;

        loop {
            tokio::select! {
                // Commands first, so a final `leave-room` goes out before the close.
                biased;

                cmd = self.cmd_rx.recv() => {
                    let Some(msg) = cmd else {
                        debug!("command channel closed, closing transport");
                        let _ = transport.close(CloseCode::NORMAL, "client dropped").await;
                        return ConnectionOutcome::Shutdown;
                    };
                    self.track_room(&msg).await;
                    let kind = msg.kind();
                    match encode_client_message(&msg, &self.identity.user_id, &token) {
                        Ok(json) => {
                            debug!(kind, "sending client message");
                            if let Err(e) = transport.send(json).await {
                                error!(kind, "transport send error: {e}");
                                return ConnectionOutcome::Closed {
                                    code: CloseCode::ABNORMAL,
                                    reason: format!("transport send error: {e}"),
                                };
                            }
                        }
                        Err(e) => error!(kind, "failed to serialize client message: {e}"),
                    }
                }

                shutdown = &mut self.shutdown_rx => {
                    let (code, reason) = shutdown
                        .unwrap_or((CloseCode::NORMAL, "client dropped".to_string()));
                    self.shared.set_state(ConnectionState::Closing);
                    if let Err(e) = transport.close(code, &reason).await {
                        debug!("close handshake failed: {e}");
                    }
                    return ConnectionOutcome::Shutdown;
                }

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => self.dispatch_frame(&text),
                    Some(Err(RoomSyncError::ClosedByPeer { code, reason })) => {
                        return ConnectionOutcome::Closed { code, reason };
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return ConnectionOutcome::Closed {
                            code: CloseCode::ABNORMAL,
                            reason: format!("transport receive error: {e}"),
                        };
                    }
                    None => {
                        return ConnectionOutcome::Closed {
                            code: CloseCode::ABNORMAL,
                            reason: "connection dropped".to_string(),
                        };
                    }
                },
            }
        }
    }

    /// Decode one frame and forward it. Bad frames are dropped, never fatal.
    fn dispatch_frame(&self, text: &str) {
        match decode_server_frame(text) {
            Ok(InboundFrame::Message(msg)) => emit_message(&self.event_tx, msg),
            Ok(InboundFrame::Unhandled(kind)) => debug!(kind, "unhandled message type"),
            Err(e) => warn!(raw = %text, "dropping malformed frame: {e}"),
        }
    }

    async fn track_room(&mut self, msg: &ClientMessage) {
        match msg {
            ClientMessage::JoinRoom { space_id, .. } => {
                *self.shared.room_id.lock().await = Some(space_id.clone());
            }
            ClientMessage::LeaveRoom { .. } => {
                *self.shared.room_id.lock().await = None;
            }
            _ => {}
        }
    }

    /// Lifecycle events are never dropped, so they use `send().await`.
    async fn emit_lifecycle(&mut self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Forward an inbound message; drop it with a warning if the channel is full.
fn emit_message(event_tx: &mpsc::Sender<SessionEvent>, msg: crate::protocol::ServerMessage) {
    match event_tx.try_send(SessionEvent::Message(msg)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("event channel full, dropping inbound message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    type Script = VecDeque<Option<std::result::Result<String, RoomSyncError>>>;

    struct MockTransport {
        incoming: Script,
        sent: Arc<StdMutex<Vec<String>>>,
        closed_with: Arc<StdMutex<Option<CloseCode>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), RoomSyncError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RoomSyncError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(
            &mut self,
            code: CloseCode,
            _reason: &str,
        ) -> std::result::Result<(), RoomSyncError> {
            *self.closed_with.lock().unwrap() = Some(code);
            Ok(())
        }
    }

    /// Hands out one scripted transport per connect call; fails once the
    /// scripts run out.
    struct MockConnector {
        scripts: VecDeque<Script>,
        connects: Arc<AtomicUsize>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed_with: Arc<StdMutex<Option<CloseCode>>>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<Option<std::result::Result<String, RoomSyncError>>>>) -> Self {
            Self {
                scripts: scripts.into_iter().map(VecDeque::from).collect(),
                connects: Arc::new(AtomicUsize::new(0)),
                sent: Arc::new(StdMutex::new(Vec::new())),
                closed_with: Arc::new(StdMutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&mut self) -> std::result::Result<MockTransport, RoomSyncError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let incoming = self
                .scripts
                .pop_front()
                .ok_or_else(|| RoomSyncError::Io(std::io::ErrorKind::ConnectionRefused.into()))?;
            Ok(MockTransport {
                incoming,
                sent: Arc::clone(&self.sent),
                closed_with: Arc::clone(&self.closed_with),
            })
        }
    }

    fn start(
        connector: MockConnector,
        config: SessionConfig,
    ) -> (RoomSession, mpsc::Receiver<SessionEvent>) {
        RoomSession::start(
            connector,
            StaticTokenProvider::new("tok"),
            Identity::new("user-1", "Ada"),
            config,
        )
    }

    async fn drain_until_ready(events: &mut mpsc::Receiver<SessionEvent>) {
        assert!(matches!(events.recv().await, Some(SessionEvent::Open)));
        assert!(matches!(events.recv().await, Some(SessionEvent::Ready { .. })));
    }

    fn dropped() -> Option<std::result::Result<String, RoomSyncError>> {
        None
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn ready_after_open_and_token() {
        let (mut session, mut events) = start(MockConnector::new(vec![vec![]]), SessionConfig::new());

        assert!(matches!(events.recv().await, Some(SessionEvent::Open)));
        match events.recv().await {
            Some(SessionEvent::Ready { user_id, reconnect }) => {
                assert_eq!(user_id, "user-1");
                assert!(!reconnect);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        assert!(session.is_ready());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn outbound_messages_carry_user_and_token() {
        let connector = MockConnector::new(vec![vec![]]);
        let sent = Arc::clone(&connector.sent);
        let (mut session, mut events) = start(connector, SessionConfig::new());
        drain_until_ready(&mut events).await;

        session
            .send(ClientMessage::GetQueue {
                space_id: "abc".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        {
            let sent = sent.lock().unwrap();
            let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
            assert_eq!(value["type"], "get-queue");
            assert_eq!(value["data"]["userId"], "user-1");
            assert_eq!(value["data"]["token"], "tok");
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn join_room_is_tracked_as_current_room() {
        let (mut session, mut events) = start(MockConnector::new(vec![vec![]]), SessionConfig::new());
        drain_until_ready(&mut events).await;

        session
            .send(ClientMessage::JoinRoom {
                space_id: "abc".into(),
                space_name: None,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.current_room_id().await.as_deref(), Some("abc"));

        session.shutdown().await;
    }

    struct NoToken;

    #[async_trait]
    impl TokenProvider for NoToken {
        async fn fetch_token(&self) -> std::result::Result<String, RoomSyncError> {
            Err(RoomSyncError::TokenUnavailable("endpoint said no".into()))
        }
    }

    #[tokio::test]
    async fn missing_token_is_terminal_and_send_fails() {
        let connector = MockConnector::new(vec![vec![], vec![]]);
        let connects = Arc::clone(&connector.connects);
        let closed_with = Arc::clone(&connector.closed_with);
        let (session, mut events) = RoomSession::start(
            connector,
            NoToken,
            Identity::new("user-1", "Ada"),
            SessionConfig::new(),
        );

        assert!(matches!(events.recv().await, Some(SessionEvent::Open)));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::ConnectionError { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));

        assert_eq!(session.connection_state(), ConnectionState::Failed);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(*closed_with.lock().unwrap(), Some(CloseCode::INVALID_TOKEN));
        let err = session
            .send(ClientMessage::GetQueue {
                space_id: "abc".into(),
            })
            .unwrap_err();
        assert!(matches!(err, RoomSyncError::NotConnected));
    }

    /// Token provider that never answers, so the session stays `Open`.
    struct SlowToken;

    #[async_trait]
    impl TokenProvider for SlowToken {
        async fn fetch_token(&self) -> std::result::Result<String, RoomSyncError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn send_before_token_is_not_ready() {
        let (mut session, mut events) = RoomSession::start(
            MockConnector::new(vec![vec![]]),
            SlowToken,
            Identity::new("user-1", "Ada"),
            SessionConfig::new().with_shutdown_timeout(Duration::from_millis(50)),
        );
        assert!(matches!(events.recv().await, Some(SessionEvent::Open)));

        let err = session
            .send(ClientMessage::PlayNext {
                space_id: "abc".into(),
            })
            .unwrap_err();
        assert!(matches!(err, RoomSyncError::NotReady));
        assert!(!session.try_send(ClientMessage::PlayNext {
            space_id: "abc".into()
        }));

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_with_linear_backoff() {
        let connector = MockConnector::new(vec![vec![dropped()], vec![]]);
        let connects = Arc::clone(&connector.connects);
        let (mut session, mut events) = start(connector, SessionConfig::new());
        drain_until_ready(&mut events).await;

        match events.recv().await {
            Some(SessionEvent::Closed {
                code,
                will_reconnect,
                ..
            }) => {
                assert_eq!(code, CloseCode::ABNORMAL);
                assert!(will_reconnect);
            }
            other => panic!("expected Closed, got {other:?}"),
        }
        match events.recv().await {
            Some(SessionEvent::Reconnecting { attempt, delay }) => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(3));
            }
            other => panic!("expected Reconnecting, got {other:?}"),
        }

        assert!(matches!(events.recv().await, Some(SessionEvent::Open)));
        match events.recv().await {
            Some(SessionEvent::Ready { reconnect, .. }) => assert!(reconnect),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(connects.load(Ordering::SeqCst), 2);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auth_close_code_does_not_reconnect() {
        let close = Some(Err(RoomSyncError::ClosedByPeer {
            code: CloseCode::AUTH_FAILURE,
            reason: "bad token".into(),
        }));
        let connector = MockConnector::new(vec![vec![close], vec![]]);
        let connects = Arc::clone(&connector.connects);
        let (session, mut events) = start(connector, SessionConfig::new());
        drain_until_ready(&mut events).await;

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Closed {
                will_reconnect: false,
                ..
            })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::ConnectionError { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(session.connection_state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_close_ends_without_error() {
        let close = Some(Err(RoomSyncError::ClosedByPeer {
            code: CloseCode::NORMAL,
            reason: String::new(),
        }));
        let (session, mut events) = start(MockConnector::new(vec![vec![close]]), SessionConfig::new());
        drain_until_ready(&mut events).await;

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Closed {
                will_reconnect: false,
                ..
            })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert_eq!(session.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_connection_survives() {
        let good = serde_json::json!({"type": "space-ended", "data": {}}).to_string();
        let connector = MockConnector::new(vec![vec![Some(Ok("{not json".into())), Some(Ok(good))]]);
        let (mut session, mut events) = start(connector, SessionConfig::new());
        drain_until_ready(&mut events).await;

        match events.recv().await {
            Some(SessionEvent::Message(msg)) => {
                assert!(matches!(msg, crate::protocol::ServerMessage::SpaceEnded { .. }));
            }
            other => panic!("expected SpaceEnded message, got {other:?}"),
        }
        assert!(session.is_ready());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_sends_requested_close_code() {
        let connector = MockConnector::new(vec![vec![]]);
        let closed_with = Arc::clone(&connector.closed_with);
        let (mut session, mut events) = start(connector, SessionConfig::new());
        drain_until_ready(&mut events).await;

        session.disconnect(CloseCode(4100), "leaving").await;
        assert_eq!(*closed_with.lock().unwrap(), Some(CloseCode(4100)));
        assert_eq!(session.connection_state(), ConnectionState::Closed);
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert!(events.recv().await.is_none());
    }

    /// Transport whose close hangs, to exercise the abort path.
    struct HangingClose {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingClose {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingClose {
        async fn send(&mut self, _message: String) -> std::result::Result<(), RoomSyncError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RoomSyncError>> {
            std::future::pending().await
        }

        async fn close(
            &mut self,
            _code: CloseCode,
            _reason: &str,
        ) -> std::result::Result<(), RoomSyncError> {
            std::future::pending().await
        }
    }

    struct HangingConnector {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for HangingConnector {
        type Transport = HangingClose;

        async fn connect(&mut self) -> std::result::Result<HangingClose, RoomSyncError> {
            Ok(HangingClose {
                dropped: Arc::clone(&self.dropped),
            })
        }
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_stuck_session() {
        let dropped = Arc::new(AtomicBool::new(false));
        let (mut session, mut events) = RoomSession::start(
            HangingConnector {
                dropped: Arc::clone(&dropped),
            },
            StaticTokenProvider::new("tok"),
            Identity::new("user-1", "Ada"),
            SessionConfig::new().with_shutdown_timeout(Duration::from_millis(20)),
        );
        drain_until_ready(&mut events).await;

        session.shutdown().await;
        assert!(dropped.load(Ordering::Acquire));
        assert!(!session.is_ready());
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn reconnect_delay_grows_with_attempt() {
        let config = SessionConfig::new().with_reconnect_base_delay(Duration::from_millis(500));
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(500));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(1500));
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = SessionConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
