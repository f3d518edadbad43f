//! Wire types for the room sync protocol.
//!
//! Every frame is a JSON text message shaped as `{ "type": ..., "data": {...} }`
//! with kebab-case type names and camelCase fields. Outbound frames are
//! enriched with `data.userId` and `data.token` by [`encode_client_message`];
//! upper layers never see credentials.
//!
//! Timestamps from the server (`createAt`) stay ISO 8601 strings. They are
//! only ever compared, and ISO 8601 UTC strings order lexicographically.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Type aliases ────────────────────────────────────────────────────

/// Server-assigned user identifier.
pub type UserId = String;

/// Server-assigned room ("space") identifier.
pub type SpaceId = String;

/// Server-assigned queue entry ("stream") identifier.
pub type StreamId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Where a song is streamed from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// A YouTube video.
    #[serde(rename = "Youtube", alias = "youtube")]
    YouTube,
    /// A Spotify track.
    #[serde(rename = "Spotify", alias = "spotify")]
    Spotify,
}

/// Direction of a queue vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    /// Add the local user's vote.
    Upvote,
    /// Withdraw the local user's vote.
    Downvote,
}

// ── Structs ─────────────────────────────────────────────────────────

/// The user who added a song.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddedByUser {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
}

/// One vote on a queue entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Upvote {
    pub user_id: UserId,
}

/// A song as the server describes it, both in the queue and as now playing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SongPayload {
    pub id: StreamId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub small_img: String,
    #[serde(default)]
    pub big_img: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub vote_count: u32,
    /// ISO 8601 creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by_user: Option<AddedByUser>,
    #[serde(default)]
    pub upvotes: Vec<Upvote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_url: Option<String>,
}

/// A room member as listed in `user-update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    pub id: UserId,
    #[serde(default, alias = "username")]
    pub name: String,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_creator: bool,
}

/// Playback state attached to `room-joined` when the room is already playing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_song: Option<SongPayload>,
    /// Position the joining client should start from, in seconds.
    #[serde(default)]
    pub should_start_at: f64,
    #[serde(default)]
    pub is_playing: bool,
}

/// A track inside an `add-batch-to-queue` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSong {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub url: String,
    #[serde(default)]
    pub small_img: String,
    #[serde(default)]
    pub big_img: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_id: Option<String>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
///
/// `userId` and `token` are deliberately absent: the session injects them into
/// every outbound frame, which also supplies the `token` field of `join-room`
/// and the `userId` field of `add-to-queue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join a room.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        space_id: SpaceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        space_name: Option<String>,
    },
    /// Leave the current room.
    #[serde(rename_all = "camelCase")]
    LeaveRoom { space_id: SpaceId },
    /// Ask the server for the authoritative roster (answered by `user-update`).
    #[serde(rename_all = "camelCase")]
    GetRoomUsers { space_id: SpaceId },
    /// Ask the server for the full queue (answered by `queue-update`).
    #[serde(rename_all = "camelCase")]
    GetQueue { space_id: SpaceId },
    /// Ask the server for the current song (answered by `current-song-update`).
    #[serde(rename_all = "camelCase")]
    GetCurrentSong { space_id: SpaceId },
    /// Admin: play a queued song right now.
    #[serde(rename_all = "camelCase")]
    PlayInstant { space_id: SpaceId, song_id: StreamId },
    /// Admin: skip to the next song.
    #[serde(rename_all = "camelCase")]
    PlayNext { space_id: SpaceId },
    /// Admin: go back to the previous song.
    #[serde(rename_all = "camelCase")]
    PlayPrev { space_id: SpaceId },
    /// Admin: pause playback for the room.
    #[serde(rename_all = "camelCase")]
    PausePlayback { space_id: SpaceId, current_time: f64 },
    /// Admin: resume playback for the room.
    #[serde(rename_all = "camelCase")]
    ResumePlayback { space_id: SpaceId, current_time: f64 },
    /// Admin: move the room's play head.
    #[serde(rename_all = "camelCase")]
    SeekPlayback { space_id: SpaceId, seek_time: f64 },
    /// Admin: remove a song from the queue.
    #[serde(rename_all = "camelCase")]
    RemoveSong {
        space_id: SpaceId,
        stream_id: StreamId,
    },
    /// Admin: clear the queue.
    #[serde(rename_all = "camelCase")]
    EmptyQueue { space_id: SpaceId },
    /// Add a song by URL.
    #[serde(rename_all = "camelCase")]
    AddToQueue { space_id: SpaceId, url: String },
    /// Add many songs at once (e.g. a playlist import).
    #[serde(rename_all = "camelCase")]
    AddBatchToQueue {
        space_id: SpaceId,
        songs: Vec<BatchSong>,
    },
    /// Vote on a queued song.
    #[serde(rename_all = "camelCase")]
    Vote {
        space_id: SpaceId,
        stream_id: StreamId,
        vote: VoteDirection,
    },
    /// Report measured round-trip latency in milliseconds.
    LatencyReport { latency: u64, timestamp: u64 },
}

impl ClientMessage {
    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::GetRoomUsers { .. } => "get-room-users",
            Self::GetQueue { .. } => "get-queue",
            Self::GetCurrentSong { .. } => "get-current-song",
            Self::PlayInstant { .. } => "play-instant",
            Self::PlayNext { .. } => "play-next",
            Self::PlayPrev { .. } => "play-prev",
            Self::PausePlayback { .. } => "pause-playback",
            Self::ResumePlayback { .. } => "resume-playback",
            Self::SeekPlayback { .. } => "seek-playback",
            Self::RemoveSong { .. } => "remove-song",
            Self::EmptyQueue { .. } => "empty-queue",
            Self::AddToQueue { .. } => "add-to-queue",
            Self::AddBatchToQueue { .. } => "add-batch-to-queue",
            Self::Vote { .. } => "vote",
            Self::LatencyReport { .. } => "latency-report",
        }
    }
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Room metadata, including the authoritative admin flag for this client.
    #[serde(rename_all = "camelCase")]
    RoomInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_admin: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        space_name: Option<String>,
    },
    /// The join request succeeded.
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        space_id: SpaceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_admin: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playback_state: Option<PlaybackStatePayload>,
    },
    /// Another listener joined.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    /// Another listener left.
    #[serde(rename_all = "camelCase")]
    UserLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    /// Authoritative roster.
    #[serde(rename_all = "camelCase")]
    UserUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connected_users: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_details: Option<Vec<UserDetail>>,
    },
    /// The room's now-playing song changed (or was re-announced).
    #[serde(rename_all = "camelCase")]
    CurrentSongUpdate {
        #[serde(default)]
        song: Option<SongPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_playing: Option<bool>,
    },
    /// Full queue replacement.
    QueueUpdate {
        #[serde(default)]
        queue: Vec<SongPayload>,
    },
    /// One song appended to the queue.
    SongAdded { song: SongPayload },
    /// Vote totals changed for one queue entry.
    #[serde(rename_all = "camelCase")]
    VoteUpdated {
        stream_id: StreamId,
        vote_count: u32,
        #[serde(default)]
        upvotes: Vec<Upvote>,
    },
    /// The admin paused playback.
    #[serde(rename_all = "camelCase")]
    PlaybackPaused {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_id: Option<StreamId>,
    },
    /// The admin resumed playback.
    #[serde(rename_all = "camelCase")]
    PlaybackResumed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_id: Option<StreamId>,
    },
    /// The admin moved the play head.
    #[serde(rename_all = "camelCase")]
    PlaybackSeeked {
        #[serde(alias = "currentTime")]
        seek_time: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_id: Option<StreamId>,
    },
    /// Periodic authoritative clock heartbeat.
    #[serde(rename_all = "camelCase")]
    PlaybackStateUpdate {
        current_time: f64,
        is_playing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_id: Option<StreamId>,
        /// Server wall clock in Unix milliseconds when the state was sampled.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    /// The server rejected something.
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    /// The room was closed by its creator.
    SpaceEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Every inbound `type` the client understands.
pub const KNOWN_SERVER_TYPES: &[&str] = &[
    "room-info",
    "room-joined",
    "user-joined",
    "user-left",
    "user-update",
    "current-song-update",
    "queue-update",
    "song-added",
    "vote-updated",
    "playback-paused",
    "playback-resumed",
    "playback-seeked",
    "playback-state-update",
    "error",
    "space-ended",
];

/// Returns `true` if the server error message reports an authorization failure.
pub fn is_unauthorized_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("unauthorized")
}

// ── Envelope codec ──────────────────────────────────────────────────

/// The untyped `{ type, data }` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A message the client understands.
    Message(ServerMessage),
    /// A well-formed envelope whose type this client does not handle.
    Unhandled(String),
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns the `serde_json` error when the frame is not valid JSON, has no
/// envelope, or is a known type with a malformed payload.
pub fn decode_server_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => Ok(InboundFrame::Message(msg)),
        Err(err) => match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) if !KNOWN_SERVER_TYPES.contains(&envelope.kind.as_str()) => {
                Ok(InboundFrame::Unhandled(envelope.kind))
            }
            _ => Err(err),
        },
    }
}

/// Serialize a [`ClientMessage`] and inject `userId` and `token` into its data.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the message cannot be serialized.
pub fn encode_client_message(
    msg: &ClientMessage,
    user_id: &str,
    token: &str,
) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(msg)?;
    if let Some(envelope) = value.as_object_mut() {
        let data = envelope
            .entry("data")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(fields) = data.as_object_mut() {
            fields.insert("userId".into(), Value::String(user_id.to_owned()));
            fields.insert("token".into(), Value::String(token.to_owned()));
        }
    }
    serde_json::to_string(&value)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn encode_injects_credentials_into_data() {
        let msg = ClientMessage::GetQueue {
            space_id: "abc".into(),
        };
        let json = encode_client_message(&msg, "user-1", "tok").unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "get-queue");
        assert_eq!(value["data"]["spaceId"], "abc");
        assert_eq!(value["data"]["userId"], "user-1");
        assert_eq!(value["data"]["token"], "tok");
    }

    #[test]
    fn join_room_carries_token_after_enrichment() {
        let msg = ClientMessage::JoinRoom {
            space_id: "abc".into(),
            space_name: Some("Late Night".into()),
        };
        let json = encode_client_message(&msg, "u", "secret").unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["data"]["spaceName"], "Late Night");
        assert_eq!(value["data"]["token"], "secret");
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let msg = ClientMessage::SeekPlayback {
            space_id: "s".into(),
            seek_time: 12.5,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.kind());
        assert_eq!(value["data"]["seekTime"], 12.5);
    }

    #[test]
    fn unknown_type_is_unhandled_not_an_error() {
        let frame = decode_server_frame(r#"{"type":"space-image-response","data":{}}"#).unwrap();
        assert_eq!(frame, InboundFrame::Unhandled("space-image-response".into()));
    }

    #[test]
    fn malformed_known_type_is_an_error() {
        let result = decode_server_frame(r#"{"type":"vote-updated","data":{"voteCount":"x"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode_server_frame("not json").is_err());
    }

    #[test]
    fn unauthorized_detection_is_case_insensitive() {
        assert!(is_unauthorized_message(
            "You are unauthorized to perform this action"
        ));
        assert!(is_unauthorized_message("Unauthorized"));
        assert!(!is_unauthorized_message("Room not found"));
    }
}
