#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
//! Protocol tests for the room sync wire format.
//!
//! Decodes JSON fixtures shaped like real server output and checks the
//! exact field names every outbound message is serialized with.

use room_sync_client::protocol::{
    decode_server_frame, encode_client_message, BatchSong, ClientMessage, InboundFrame,
    ServerMessage, SourceType, VoteDirection,
};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn decode(value: &Value) -> ServerMessage {
    match decode_server_frame(&value.to_string()).expect("decode") {
        InboundFrame::Message(msg) => msg,
        InboundFrame::Unhandled(kind) => panic!("unexpected unhandled type {kind}"),
    }
}

fn encode(msg: &ClientMessage) -> Value {
    let text = encode_client_message(msg, "user-1", "tok").expect("encode");
    serde_json::from_str(&text).expect("parse")
}

const SONG_FIXTURE: &str = r#"{
    "id": "s-1",
    "title": "Blue in Green",
    "artist": "Miles Davis",
    "url": "https://www.youtube.com/watch?v=PoPL7BExSQU",
    "smallImg": "https://i.ytimg.com/vi/PoPL7BExSQU/default.jpg",
    "bigImg": "https://i.ytimg.com/vi/PoPL7BExSQU/hqdefault.jpg",
    "type": "Youtube",
    "voteCount": 2,
    "createAt": "2024-03-01T20:15:00.000Z",
    "addedByUser": { "id": "u-host", "username": "host" },
    "upvotes": [{ "userId": "u-a" }, { "userId": "u-b" }]
}"#;

fn song_fixture() -> Value {
    serde_json::from_str(SONG_FIXTURE).unwrap()
}

// ════════════════════════════════════════════════════════════════════
// Server fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_info_fixture() {
    let msg = decode(&json!({
        "type": "room-info",
        "data": { "isAdmin": true, "userCount": 4, "spaceName": "Late Night" }
    }));
    assert_eq!(
        msg,
        ServerMessage::RoomInfo {
            is_admin: Some(true),
            user_count: Some(4),
            space_name: Some("Late Night".into()),
        }
    );
}

#[test]
fn room_joined_with_playback_state_fixture() {
    let msg = decode(&json!({
        "type": "room-joined",
        "data": {
            "spaceId": "abc",
            "userId": "user-1",
            "message": "Successfully joined space",
            "isAdmin": false,
            "playbackState": {
                "currentSong": song_fixture(),
                "shouldStartAt": 73.25,
                "isPlaying": true
            }
        }
    }));
    let ServerMessage::RoomJoined {
        space_id,
        is_admin,
        playback_state,
        ..
    } = msg
    else {
        panic!("expected RoomJoined");
    };
    assert_eq!(space_id, "abc");
    assert_eq!(is_admin, Some(false));
    let state = playback_state.expect("playback state");
    assert_eq!(state.should_start_at, 73.25);
    assert!(state.is_playing);
    assert_eq!(state.current_song.unwrap().id, "s-1");
}

#[test]
fn song_payload_fields() {
    let msg = decode(&json!({ "type": "song-added", "data": { "song": song_fixture() } }));
    let ServerMessage::SongAdded { song } = msg else {
        panic!("expected SongAdded");
    };
    assert_eq!(song.title, "Blue in Green");
    assert_eq!(song.artist.as_deref(), Some("Miles Davis"));
    assert_eq!(song.source_type, SourceType::YouTube);
    assert_eq!(song.vote_count, 2);
    assert_eq!(song.create_at.as_deref(), Some("2024-03-01T20:15:00.000Z"));
    assert_eq!(song.added_by_user.unwrap().username, "host");
    let voters: Vec<_> = song.upvotes.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(voters, ["u-a", "u-b"]);
}

#[test]
fn song_payload_tolerates_missing_optional_fields() {
    let msg = decode(&json!({
        "type": "song-added",
        "data": { "song": {
            "id": "s-2",
            "title": "Track",
            "url": "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            "type": "spotify"
        }}
    }));
    let ServerMessage::SongAdded { song } = msg else {
        panic!("expected SongAdded");
    };
    assert_eq!(song.source_type, SourceType::Spotify);
    assert_eq!(song.vote_count, 0);
    assert!(song.artist.is_none());
    assert!(song.create_at.is_none());
    assert!(song.upvotes.is_empty());
}

#[test]
fn queue_update_fixture() {
    let msg = decode(&json!({
        "type": "queue-update",
        "data": { "queue": [song_fixture(), song_fixture()] }
    }));
    let ServerMessage::QueueUpdate { queue } = msg else {
        panic!("expected QueueUpdate");
    };
    assert_eq!(queue.len(), 2);
}

#[test]
fn current_song_update_without_song() {
    let msg = decode(&json!({ "type": "current-song-update", "data": { "song": null } }));
    assert_eq!(
        msg,
        ServerMessage::CurrentSongUpdate {
            song: None,
            current_time: None,
            is_playing: None,
        }
    );
}

#[test]
fn playback_events_fixture() {
    let paused = decode(&json!({
        "type": "playback-paused",
        "data": { "currentTime": 31.5, "songId": "s-1" }
    }));
    assert_eq!(
        paused,
        ServerMessage::PlaybackPaused {
            current_time: Some(31.5),
            song_id: Some("s-1".into()),
        }
    );

    let seeked = decode(&json!({ "type": "playback-seeked", "data": { "seekTime": 90.0 } }));
    assert_eq!(
        seeked,
        ServerMessage::PlaybackSeeked {
            seek_time: 90.0,
            song_id: None,
        }
    );

    // Older servers send the seek target as `currentTime`.
    let legacy = decode(&json!({ "type": "playback-seeked", "data": { "currentTime": 12.0 } }));
    assert!(matches!(
        legacy,
        ServerMessage::PlaybackSeeked { seek_time, .. } if seek_time == 12.0
    ));

    let heartbeat = decode(&json!({
        "type": "playback-state-update",
        "data": { "currentTime": 42.0, "isPlaying": true, "songId": "s-1", "timestamp": 1709324100000u64 }
    }));
    assert_eq!(
        heartbeat,
        ServerMessage::PlaybackStateUpdate {
            current_time: 42.0,
            is_playing: true,
            song_id: Some("s-1".into()),
            timestamp: Some(1_709_324_100_000),
        }
    );
}

#[test]
fn roster_fixtures() {
    let update = decode(&json!({
        "type": "user-update",
        "data": {
            "userCount": 2,
            "connectedUsers": 2,
            "userDetails": [
                { "id": "u-1", "name": "Ada", "imageUrl": "https://img/a.png", "isCreator": true },
                { "id": "u-2", "name": "Grace" }
            ]
        }
    }));
    let ServerMessage::UserUpdate {
        user_count,
        user_details,
        ..
    } = update
    else {
        panic!("expected UserUpdate");
    };
    assert_eq!(user_count, Some(2));
    let details = user_details.unwrap();
    assert!(details[0].is_creator);
    assert!(!details[1].is_creator);
    assert!(details[1].image_url.is_none());

    let left = decode(&json!({ "type": "user-left", "data": { "userId": "u-2" } }));
    assert_eq!(
        left,
        ServerMessage::UserLeft {
            user_id: Some("u-2".into())
        }
    );
}

#[test]
fn vote_updated_fixture() {
    let msg = decode(&json!({
        "type": "vote-updated",
        "data": { "streamId": "s-1", "voteCount": 3, "upvotes": [{ "userId": "u-a" }] }
    }));
    let ServerMessage::VoteUpdated {
        stream_id,
        vote_count,
        upvotes,
    } = msg
    else {
        panic!("expected VoteUpdated");
    };
    assert_eq!(stream_id, "s-1");
    assert_eq!(vote_count, 3);
    assert_eq!(upvotes.len(), 1);
}

#[test]
fn error_and_space_ended_fixtures() {
    let error = decode(&json!({
        "type": "error",
        "data": { "message": "Unauthorized", "code": "AUTH", "details": { "retry": false } }
    }));
    let ServerMessage::Error { message, code, details } = error else {
        panic!("expected Error");
    };
    assert_eq!(message, "Unauthorized");
    assert_eq!(code.as_deref(), Some("AUTH"));
    assert_eq!(details.unwrap()["retry"], false);

    let ended = decode(&json!({ "type": "space-ended", "data": {} }));
    assert_eq!(ended, ServerMessage::SpaceEnded { reason: None });
}

#[test]
fn unknown_types_are_reported_not_rejected() {
    for kind in ["space-image-response", "discord-activity", "pong"] {
        let frame = decode_server_frame(&json!({ "type": kind, "data": {} }).to_string()).unwrap();
        assert_eq!(frame, InboundFrame::Unhandled(kind.to_string()));
    }
}

#[test]
fn malformed_frames_are_errors() {
    let bad = [
        "",
        "[]",
        r#"{"data":{}}"#,
        r#"{"type":"playback-state-update","data":{"isPlaying":true}}"#,
        r#"{"type":"room-joined","data":{}}"#,
    ];
    for text in bad {
        assert!(decode_server_frame(text).is_err(), "accepted {text:?}");
    }
}

// ════════════════════════════════════════════════════════════════════
// Client messages
// ════════════════════════════════════════════════════════════════════

#[test]
fn every_client_message_is_enriched() {
    let messages = vec![
        ClientMessage::JoinRoom {
            space_id: "abc".into(),
            space_name: None,
        },
        ClientMessage::LeaveRoom {
            space_id: "abc".into(),
        },
        ClientMessage::GetRoomUsers {
            space_id: "abc".into(),
        },
        ClientMessage::GetQueue {
            space_id: "abc".into(),
        },
        ClientMessage::GetCurrentSong {
            space_id: "abc".into(),
        },
        ClientMessage::PlayNext {
            space_id: "abc".into(),
        },
        ClientMessage::PlayPrev {
            space_id: "abc".into(),
        },
        ClientMessage::EmptyQueue {
            space_id: "abc".into(),
        },
        ClientMessage::LatencyReport {
            latency: 40,
            timestamp: 1,
        },
    ];
    for msg in &messages {
        let value = encode(msg);
        assert_eq!(value["type"], msg.kind());
        assert_eq!(value["data"]["userId"], "user-1", "{}", msg.kind());
        assert_eq!(value["data"]["token"], "tok", "{}", msg.kind());
    }
}

#[test]
fn join_room_omits_absent_name() {
    let value = encode(&ClientMessage::JoinRoom {
        space_id: "abc".into(),
        space_name: None,
    });
    assert!(value["data"].get("spaceName").is_none());
}

#[test]
fn playback_command_field_names() {
    let pause = encode(&ClientMessage::PausePlayback {
        space_id: "abc".into(),
        current_time: 12.5,
    });
    assert_eq!(pause["type"], "pause-playback");
    assert_eq!(pause["data"]["currentTime"], 12.5);

    let resume = encode(&ClientMessage::ResumePlayback {
        space_id: "abc".into(),
        current_time: 12.5,
    });
    assert_eq!(resume["type"], "resume-playback");

    let seek = encode(&ClientMessage::SeekPlayback {
        space_id: "abc".into(),
        seek_time: 60.0,
    });
    assert_eq!(seek["type"], "seek-playback");
    assert_eq!(seek["data"]["seekTime"], 60.0);

    let instant = encode(&ClientMessage::PlayInstant {
        space_id: "abc".into(),
        song_id: "s-1".into(),
    });
    assert_eq!(instant["type"], "play-instant");
    assert_eq!(instant["data"]["songId"], "s-1");
}

#[test]
fn queue_command_field_names() {
    let vote = encode(&ClientMessage::Vote {
        space_id: "abc".into(),
        stream_id: "s-1".into(),
        vote: VoteDirection::Downvote,
    });
    assert_eq!(vote["data"]["streamId"], "s-1");
    assert_eq!(vote["data"]["vote"], "downvote");

    let remove = encode(&ClientMessage::RemoveSong {
        space_id: "abc".into(),
        stream_id: "s-1".into(),
    });
    assert_eq!(remove["type"], "remove-song");
    assert_eq!(remove["data"]["streamId"], "s-1");

    let batch = encode(&ClientMessage::AddBatchToQueue {
        space_id: "abc".into(),
        songs: vec![BatchSong {
            title: "Track".into(),
            artist: None,
            url: "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC".into(),
            small_img: String::new(),
            big_img: String::new(),
            source_type: SourceType::Spotify,
            spotify_id: Some("4uLU6hMCjMI75M1A2tKUQC".into()),
        }],
    });
    assert_eq!(batch["type"], "add-batch-to-queue");
    assert_eq!(batch["data"]["songs"][0]["type"], "Spotify");
    assert_eq!(batch["data"]["songs"][0]["spotifyId"], "4uLU6hMCjMI75M1A2tKUQC");
}
