//! Room client: the session plus the sync components, driven by one task.
//!
//! [`RoomClient`] is the handle applications use. It starts a
//! [`RoomSession`] and a room loop that owns the [`MembershipController`],
//! [`Reconciler`], [`CommandDispatcher`] and [`QueueProjector`]. User intents
//! go in through the handle's methods; [`RoomEvent`]s come out of the channel
//! returned by [`RoomClient::start`].
//!
//! All component timers are deadlines inside the loop, served by a single
//! `sleep_until` on the earliest one, so stopping the loop stops them too.
//!
//! # Example
//!
//! ```rust,ignore
//! let (client, mut events) = RoomClient::start(
//!     WebSocketConnector::new(url),
//!     StaticTokenProvider::new(token),
//!     Identity::new("u1", "Ada"),
//!     SessionConfig::new(),
//!     SyncConfig::new(),
//! );
//! client.join("abc", None)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RoomEvent::Player(command) => player.apply(command),
//!         RoomEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{Identity, TokenProvider};
use crate::config::SyncConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Result, RoomSyncError};
use crate::event::{ConnectionStatus, PlayerCommand, RoomEvent, SessionEvent};
use crate::membership::{MembershipAction, MembershipController, RoomMembership};
use crate::protocol::{
    BatchSong, ClientMessage, ServerMessage, SourceType, SpaceId, StreamId, UserId,
};
use crate::queue::{add_to_queue_request, QueueProjector};
use crate::reconciler::{Reconciler, ReconcilerState};
use crate::session::{RoomSession, SessionConfig};
use crate::transport::Connector;

/// A user intent sent from the handle to the room loop.
#[derive(Debug)]
enum Intent {
    Join {
        space_id: SpaceId,
        space_name: Option<String>,
        host_id: Option<UserId>,
    },
    Leave,
    PlayPause,
    Seek(f64),
    BeginSeek(f64),
    UpdateSeek(f64),
    CommitSeek,
    SkipNext,
    SkipPrevious,
    Volume(f32),
    ToggleMute,
    PlayInstant(StreamId),
    RemoveSong(StreamId),
    EmptyQueue,
    Vote(StreamId),
    AddToQueue(String),
    AddBatch(Vec<BatchSong>),
    MediaReady,
    ReportLatency(Duration),
}

/// State shared between the handle and the room loop.
struct RoomShared {
    is_admin: AtomicBool,
    status: Mutex<ConnectionStatus>,
    membership: Mutex<RoomMembership>,
}

// ── Room handle ─────────────────────────────────────────────────────

/// Handle to a running room client.
///
/// Methods only enqueue intents and return immediately. They fail with
/// [`RoomSyncError::NotConnected`] once the room loop has stopped.
pub struct RoomClient {
    intent_tx: mpsc::UnboundedSender<Intent>,
    shared: Arc<RoomShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl RoomClient {
    /// Connect and start the room loop.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C, P>(
        connector: C,
        tokens: P,
        identity: Identity,
        session_config: SessionConfig,
        sync_config: SyncConfig,
    ) -> (Self, mpsc::Receiver<RoomEvent>)
    where
        C: Connector,
        P: TokenProvider,
    {
        let user_id = identity.user_id.clone();
        let (session, session_rx) = RoomSession::start(connector, tokens, identity, session_config);

        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(sync_config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = Arc::new(RoomShared {
            is_admin: AtomicBool::new(false),
            status: Mutex::new(ConnectionStatus::Connecting),
            membership: Mutex::new(RoomMembership::default()),
        });

        let now = Instant::now();
        let room_loop = RoomLoop {
            membership: MembershipController::new(user_id.clone(), &sync_config),
            reconciler: Reconciler::new(&sync_config, now),
            dispatcher: CommandDispatcher::new(sync_config.seek_debounce),
            queue: QueueProjector::new(),
            user_id,
            session,
            session_rx,
            intent_rx,
            event_tx,
            shared: Arc::clone(&shared),
            shutdown_rx,
            join_sent: false,
            outbox: Vec::new(),
        };
        let task = tokio::spawn(room_loop.run());

        let client = Self {
            intent_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: sync_config.shutdown_timeout,
        };
        (client, event_rx)
    }

    fn submit(&self, intent: Intent) -> Result<()> {
        self.intent_tx
            .send(intent)
            .map_err(|_| RoomSyncError::NotConnected)
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Join a room. Sent as soon as the session is ready.
    pub fn join(&self, space_id: impl Into<SpaceId>, space_name: Option<String>) -> Result<()> {
        self.submit(Intent::Join {
            space_id: space_id.into(),
            space_name,
            host_id: None,
        })
    }

    /// Join a room whose creator id is known, so the admin flag can be
    /// guessed before the server confirms it.
    pub fn join_as(
        &self,
        space_id: impl Into<SpaceId>,
        space_name: Option<String>,
        host_id: impl Into<UserId>,
    ) -> Result<()> {
        self.submit(Intent::Join {
            space_id: space_id.into(),
            space_name,
            host_id: Some(host_id.into()),
        })
    }

    /// Leave the current room.
    pub fn leave(&self) -> Result<()> {
        self.submit(Intent::Leave)
    }

    // ── Playback (admin only) ───────────────────────────────────────

    pub fn request_play_pause(&self) -> Result<()> {
        self.submit(Intent::PlayPause)
    }

    /// Seek in one step (keyboard, skip buttons).
    pub fn request_seek(&self, seconds: f64) -> Result<()> {
        self.submit(Intent::Seek(seconds))
    }

    /// Start dragging the seek bar.
    pub fn begin_seek(&self, seconds: f64) -> Result<()> {
        self.submit(Intent::BeginSeek(seconds))
    }

    /// Move the seek bar while dragging.
    pub fn update_seek(&self, seconds: f64) -> Result<()> {
        self.submit(Intent::UpdateSeek(seconds))
    }

    /// Release the seek bar.
    pub fn commit_seek(&self) -> Result<()> {
        self.submit(Intent::CommitSeek)
    }

    pub fn request_skip_next(&self) -> Result<()> {
        self.submit(Intent::SkipNext)
    }

    pub fn request_skip_previous(&self) -> Result<()> {
        self.submit(Intent::SkipPrevious)
    }

    // ── Local output ────────────────────────────────────────────────

    /// Set the local volume (`0.0..=1.0`). Never sent to the server.
    pub fn request_volume_change(&self, level: f32) -> Result<()> {
        self.submit(Intent::Volume(level))
    }

    pub fn toggle_mute(&self) -> Result<()> {
        self.submit(Intent::ToggleMute)
    }

    /// Tell the client the media component has loaded the current track.
    pub fn media_ready(&self) -> Result<()> {
        self.submit(Intent::MediaReady)
    }

    // ── Queue ───────────────────────────────────────────────────────

    /// Admin: play a queued song now.
    pub fn request_play_instant(&self, stream_id: impl Into<StreamId>) -> Result<()> {
        self.submit(Intent::PlayInstant(stream_id.into()))
    }

    /// Admin: remove a song from the queue.
    pub fn request_remove_song(&self, stream_id: impl Into<StreamId>) -> Result<()> {
        self.submit(Intent::RemoveSong(stream_id.into()))
    }

    /// Admin: clear the queue.
    pub fn request_empty_queue(&self) -> Result<()> {
        self.submit(Intent::EmptyQueue)
    }

    /// Toggle the local user's vote on a queued song.
    pub fn vote(&self, stream_id: impl Into<StreamId>) -> Result<()> {
        self.submit(Intent::Vote(stream_id.into()))
    }

    /// Add a YouTube or Spotify link to the queue.
    ///
    /// # Errors
    ///
    /// [`RoomSyncError::InvalidUrl`] if the link is neither, checked before
    /// anything is sent.
    pub fn add_to_queue(&self, url: &str) -> Result<()> {
        let url = url.trim();
        if SourceType::classify_url(url).is_none() {
            return Err(RoomSyncError::InvalidUrl(url.to_owned()));
        }
        self.submit(Intent::AddToQueue(url.to_owned()))
    }

    /// Add several songs at once, e.g. from a playlist import.
    pub fn add_batch_to_queue(&self, songs: Vec<BatchSong>) -> Result<()> {
        self.submit(Intent::AddBatch(songs))
    }

    /// Report a measured round-trip latency.
    pub fn report_latency(&self, latency: Duration) -> Result<()> {
        self.submit(Intent::ReportLatency(latency))
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Last known connection status. Stays `Failed` after a terminal error.
    pub async fn connection_status(&self) -> ConnectionStatus {
        self.shared.status.lock().await.clone()
    }

    /// Latest membership snapshot.
    pub async fn membership(&self) -> RoomMembership {
        self.shared.membership.lock().await.clone()
    }

    /// Whether the local user may control playback.
    pub fn is_admin(&self) -> bool {
        self.shared.is_admin.load(Ordering::Acquire)
    }

    /// Leave the room, close the session and stop the room loop.
    ///
    /// After this returns the event receiver yields [`RoomEvent::Closed`]
    /// and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("room client shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("room loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("room loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("room loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient")
            .field("is_admin", &self.is_admin())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        // Aborting the room loop drops the session handle, which aborts the
        // session loop in turn.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Room loop ───────────────────────────────────────────────────────

struct RoomLoop {
    membership: MembershipController,
    reconciler: Reconciler,
    dispatcher: CommandDispatcher,
    queue: QueueProjector,
    user_id: UserId,

    session: RoomSession,
    session_rx: mpsc::Receiver<SessionEvent>,
    intent_rx: mpsc::UnboundedReceiver<Intent>,
    event_tx: mpsc::Sender<RoomEvent>,
    shared: Arc<RoomShared>,
    shutdown_rx: oneshot::Receiver<()>,
    /// A `join-room` went out on the current connection.
    join_sent: bool,
    /// Events produced while handling one input, flushed afterwards.
    outbox: Vec<RoomEvent>,
}

impl RoomLoop {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    debug!("room loop shutting down");
                    if let Some(msg) = self.membership.leave() {
                        self.send(msg);
                    }
                    break;
                }

                event = self.session_rx.recv() => match event {
                    Some(event) => self.on_session_event(event).await,
                    None => {
                        debug!("session ended; stopping room loop");
                        break;
                    }
                },

                intent = self.intent_rx.recv() => match intent {
                    Some(intent) => self.on_intent(intent, Instant::now()),
                    None => {
                        debug!("room handle dropped; stopping room loop");
                        break;
                    }
                },

                () = timer => self.on_tick(Instant::now()),
            }

            self.flush().await;
        }

        self.dispatcher.cancel();
        self.session.shutdown().await;
        self.flush().await;
        if self.event_tx.send(RoomEvent::Closed).await.is_err() {
            debug!("room event channel closed, receiver dropped");
        }
        debug!("room loop exited");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.membership.next_deadline(),
            self.reconciler.next_deadline(),
            self.dispatcher.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ── Session events ──────────────────────────────────────────────

    async fn on_session_event(&mut self, event: SessionEvent) {
        let now = Instant::now();
        match event {
            SessionEvent::Open => {}
            SessionEvent::Ready { reconnect, .. } => {
                self.set_status(ConnectionStatus::Ready).await;
                let Some(space_id) = self.membership.room_id().cloned() else {
                    return;
                };
                if !self.join_sent {
                    if let Some(join) = self.membership.rejoin(now) {
                        self.join_sent = self.send(join);
                    }
                }
                if reconnect {
                    info!(space_id = %space_id, "reconnected; refreshing room state");
                    self.send(ClientMessage::GetQueue {
                        space_id: space_id.clone(),
                    });
                    self.send(ClientMessage::GetCurrentSong {
                        space_id: space_id.clone(),
                    });
                    self.send(ClientMessage::GetRoomUsers { space_id });
                }
            }
            SessionEvent::Message(msg) => self.on_server_message(&msg, now),
            SessionEvent::Closed { will_reconnect, .. } => {
                // Anything scheduled against the old connection is stale.
                self.dispatcher.cancel();
                self.join_sent = false;
                if !will_reconnect {
                    self.set_status(ConnectionStatus::Closed).await;
                }
            }
            SessionEvent::Reconnecting { attempt, .. } => {
                self.set_status(ConnectionStatus::Reconnecting { attempt }).await;
            }
            SessionEvent::ConnectionError { reason } => {
                self.set_status(ConnectionStatus::Failed { reason }).await;
            }
            SessionEvent::Disconnected { .. } => {}
        }
    }

    fn on_server_message(&mut self, msg: &ServerMessage, now: Instant) {
        for action in self.membership.handle(msg, now) {
            match action {
                MembershipAction::Send(out) => {
                    self.send(out);
                }
                MembershipAction::AuthorizationExhausted { attempts } => {
                    self.outbox
                        .push(RoomEvent::AuthorizationExhausted { attempts });
                }
                MembershipAction::ServerError { message, code } => {
                    self.outbox.push(RoomEvent::ServerError { message, code });
                }
                MembershipAction::RoomEnded { reason } => {
                    self.dispatcher.cancel();
                    self.queue.reset();
                    let commands = self.reconciler.unload();
                    self.push_player(commands);
                    self.push_queue();
                    self.push_playback(now);
                    self.outbox.push(RoomEvent::RoomEnded { reason });
                }
            }
        }

        if self.queue.apply(msg) {
            self.push_queue();
        }

        let playback_related = matches!(
            msg,
            ServerMessage::CurrentSongUpdate { .. }
                | ServerMessage::RoomJoined { .. }
                | ServerMessage::PlaybackPaused { .. }
                | ServerMessage::PlaybackResumed { .. }
                | ServerMessage::PlaybackSeeked { .. }
                | ServerMessage::PlaybackStateUpdate { .. }
        );
        if playback_related {
            let commands = self.reconciler.handle(msg, now);
            self.push_player(commands);
            self.push_playback(now);
        }
    }

    // ── Intents ─────────────────────────────────────────────────────

    fn on_intent(&mut self, intent: Intent, now: Instant) {
        match intent {
            Intent::Join {
                space_id,
                space_name,
                host_id,
            } => {
                if host_id.is_some() {
                    self.membership.set_host_id(host_id);
                }
                let join = self.membership.join(space_id, space_name, now);
                self.join_sent = self.send(join);
            }
            Intent::Leave => {
                self.dispatcher.cancel();
                if let Some(msg) = self.membership.leave() {
                    self.send(msg);
                }
                self.join_sent = false;
                self.queue.reset();
                let commands = self.reconciler.unload();
                self.push_player(commands);
                self.push_queue();
                self.push_playback(now);
            }
            Intent::PlayPause => {
                let playing = self.reconciler.is_playing();
                let position = self.reconciler.position(now);
                if let Some(msg) = self.dispatcher.request_play_pause(
                    self.membership.membership(),
                    playing,
                    position,
                ) {
                    self.send(msg);
                    let commands = self.reconciler.set_local_playing(!playing, now);
                    self.push_player(commands);
                    self.push_playback(now);
                }
            }
            Intent::Seek(seconds) => {
                if self
                    .dispatcher
                    .request_seek(self.membership.membership(), seconds, now)
                    && self.reconciler.begin_local_seek(seconds, now)
                {
                    let commands = self.reconciler.commit_local_seek(now);
                    self.push_player(commands);
                    self.push_playback(now);
                }
            }
            Intent::BeginSeek(seconds) => {
                if self
                    .dispatcher
                    .authorize(self.membership.membership(), "seek")
                    .is_some()
                    && self.reconciler.begin_local_seek(seconds, now)
                {
                    self.push_playback(now);
                }
            }
            Intent::UpdateSeek(seconds) => self.reconciler.update_local_seek(seconds),
            Intent::CommitSeek => {
                if self.reconciler.state() != ReconcilerState::Seeking {
                    return;
                }
                let Some(target) = self.reconciler.pending_seek().map(|p| p.target_secs) else {
                    return;
                };
                if self
                    .dispatcher
                    .request_seek(self.membership.membership(), target, now)
                {
                    let commands = self.reconciler.commit_local_seek(now);
                    self.push_player(commands);
                } else {
                    // Lost admin mid-drag: drop the gesture, the play head stays put.
                    self.reconciler.cancel_local_seek();
                }
                self.push_playback(now);
            }
            Intent::SkipNext => {
                if let Some(msg) = self
                    .dispatcher
                    .request_skip_next(self.membership.membership())
                {
                    self.send(msg);
                }
            }
            Intent::SkipPrevious => {
                if let Some(msg) = self
                    .dispatcher
                    .request_skip_previous(self.membership.membership())
                {
                    self.send(msg);
                }
            }
            Intent::Volume(level) => {
                let command = self.dispatcher.request_volume_change(level);
                self.outbox.push(RoomEvent::Player(command));
            }
            Intent::ToggleMute => {
                let command = self.dispatcher.toggle_mute();
                self.outbox.push(RoomEvent::Player(command));
            }
            Intent::PlayInstant(stream_id) => {
                if let Some(msg) = self
                    .dispatcher
                    .request_play_instant(self.membership.membership(), &stream_id)
                {
                    self.send(msg);
                }
            }
            Intent::RemoveSong(stream_id) => {
                if let Some(msg) = self
                    .dispatcher
                    .request_remove_song(self.membership.membership(), &stream_id)
                {
                    self.send(msg);
                    if self.queue.remove(&stream_id).is_some() {
                        self.push_queue();
                    }
                }
            }
            Intent::EmptyQueue => {
                if let Some(msg) = self
                    .dispatcher
                    .request_empty_queue(self.membership.membership())
                {
                    self.send(msg);
                    self.queue.clear();
                    self.push_queue();
                }
            }
            Intent::Vote(stream_id) => {
                let Some(space_id) = self.membership.room_id().cloned() else {
                    debug!("vote ignored: not in a room");
                    return;
                };
                match self.queue.vote(&space_id, &stream_id, &self.user_id) {
                    Some(msg) => {
                        self.send(msg);
                        self.push_queue();
                    }
                    None => debug!(stream_id = %stream_id, "vote ignored: not in the queue"),
                }
            }
            Intent::AddToQueue(url) => {
                let Some(space_id) = self.membership.room_id().cloned() else {
                    debug!("add-to-queue ignored: not in a room");
                    return;
                };
                match add_to_queue_request(&space_id, &url) {
                    Ok(msg) => {
                        self.send(msg);
                    }
                    Err(e) => warn!("{e}"),
                }
            }
            Intent::AddBatch(songs) => {
                let Some(space_id) = self.membership.room_id().cloned() else {
                    debug!("add-batch-to-queue ignored: not in a room");
                    return;
                };
                if !songs.is_empty() {
                    self.send(ClientMessage::AddBatchToQueue { space_id, songs });
                }
            }
            Intent::MediaReady => {
                let commands = self.reconciler.on_media_ready(now);
                self.push_player(commands);
                self.push_playback(now);
            }
            Intent::ReportLatency(latency) => {
                if let Err(e) = self.session.report_latency(latency) {
                    debug!("latency report not sent: {e}");
                }
            }
        }
    }

    fn on_tick(&mut self, now: Instant) {
        for msg in self.membership.on_tick(now) {
            self.send(msg);
        }
        if let Some(msg) = self.dispatcher.on_tick(now) {
            self.send(msg);
        }
        let guarded = self.reconciler.pending_seek().is_some();
        self.reconciler.on_tick(now);
        if guarded && self.reconciler.pending_seek().is_none() {
            self.push_playback(now);
        }
    }

    // ── Output ──────────────────────────────────────────────────────

    /// Hand a message to the session. Returns `false` if it was not accepted.
    fn send(&self, msg: ClientMessage) -> bool {
        let kind = msg.kind();
        match self.session.send(msg) {
            Ok(()) => true,
            // Joins are replayed on `Ready`; everything else is re-fetched.
            Err(RoomSyncError::NotReady) => {
                debug!(kind, "session not ready; message dropped");
                false
            }
            Err(e) => {
                warn!(kind, "message not sent: {e}");
                false
            }
        }
    }

    fn push_player(&mut self, commands: Vec<PlayerCommand>) {
        self.outbox
            .extend(commands.into_iter().map(RoomEvent::Player));
    }

    fn push_playback(&mut self, now: Instant) {
        self.outbox
            .push(RoomEvent::Playback(self.reconciler.snapshot(now)));
    }

    fn push_queue(&mut self) {
        self.outbox.push(RoomEvent::Queue {
            entries: self.queue.entries().to_vec(),
            now_playing: self.queue.now_playing().cloned(),
        });
    }

    async fn set_status(&mut self, status: ConnectionStatus) {
        let mut current = self.shared.status.lock().await;
        if *current != status {
            *current = status.clone();
            self.outbox.push(RoomEvent::Connection(status));
        }
    }

    /// Publish the membership snapshot if it changed.
    async fn publish_membership(&mut self) {
        let snapshot = self.membership.membership();
        self.shared
            .is_admin
            .store(snapshot.is_admin, Ordering::Release);
        let mut published = self.shared.membership.lock().await;
        if *published != *snapshot {
            *published = snapshot.clone();
            self.outbox.push(RoomEvent::Membership(snapshot.clone()));
        }
    }

    /// Deliver queued events. Snapshots are dropped when the consumer lags;
    /// everything else waits for room in the channel.
    async fn flush(&mut self) {
        self.publish_membership().await;
        for event in std::mem::take(&mut self.outbox) {
            if event.is_droppable() {
                match self.event_tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("room event channel full, dropping snapshot");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("room event channel closed, receiver dropped");
                    }
                }
            } else if self.event_tx.send(event).await.is_err() {
                debug!("room event channel closed, receiver dropped");
            }
        }
    }
}
