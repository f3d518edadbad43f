//! Events emitted by the session and the room client.

use std::time::Duration;

use crate::close_code::CloseCode;
use crate::membership::RoomMembership;
use crate::protocol::{ServerMessage, SongPayload, UserId};
use crate::queue::QueueEntry;
use crate::reconciler::PlaybackSnapshot;

/// Events emitted by a [`RoomSession`](crate::session::RoomSession).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A raw connection is open; the token has not been attached yet.
    Open,
    /// The token is attached and messages can be sent.
    ///
    /// `reconnect` is `true` when this follows an earlier connection of the
    /// same session, in which case no server state should be trusted.
    Ready { user_id: UserId, reconnect: bool },
    /// An inbound message from the server.
    Message(ServerMessage),
    /// The connection closed.
    Closed {
        code: CloseCode,
        reason: String,
        will_reconnect: bool,
    },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal, user-visible failure: no token, auth rejected or retries
    /// exhausted.
    ConnectionError { reason: String },
    /// The session loop has stopped. Always the last event.
    Disconnected { reason: Option<String> },
}

/// Instructions for the external media component.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Load a new track and start it at `position` seconds.
    Load {
        song: SongPayload,
        position: f64,
        play: bool,
    },
    /// Jump to a position in seconds.
    SeekTo(f64),
    /// Start or resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Set the output volume, `0.0..=1.0`.
    SetVolume(f32),
    /// Mute or unmute the output.
    SetMuted(bool),
}

/// Connection status as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Opening the connection or waiting for a token.
    Connecting,
    /// Connected and authenticated.
    Ready,
    /// Connection lost, reconnect attempt `attempt` pending.
    Reconnecting { attempt: u32 },
    /// Closed without error.
    Closed,
    /// Terminal failure; a new client is needed.
    Failed { reason: String },
}

impl ConnectionStatus {
    /// Returns `true` if the client can talk to the server.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Events emitted by a [`RoomClient`](crate::room::RoomClient).
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Connection status changed.
    Connection(ConnectionStatus),
    /// Room name, admin flag or roster changed.
    Membership(RoomMembership),
    /// The local playback clock changed or was re-checked against the server.
    Playback(PlaybackSnapshot),
    /// The ranked queue or the now-playing entry changed.
    Queue {
        entries: Vec<QueueEntry>,
        now_playing: Option<QueueEntry>,
    },
    /// Something for the media component to do.
    Player(PlayerCommand),
    /// The server kept rejecting this client; automatic rejoin has stopped.
    AuthorizationExhausted { attempts: u32 },
    /// The server reported a non-authorization error.
    ServerError {
        message: String,
        code: Option<String>,
    },
    /// The room was closed by its creator.
    RoomEnded { reason: Option<String> },
    /// The room client has stopped. Always the last event.
    Closed,
}

impl RoomEvent {
    /// Snapshot events may be dropped under backpressure since a newer one
    /// always follows. Everything else must reach the consumer.
    pub(crate) fn is_droppable(&self) -> bool {
        matches!(
            self,
            Self::Membership(_) | Self::Playback(_) | Self::Queue { .. }
        )
    }
}
