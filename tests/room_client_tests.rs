#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
//! End-to-end tests for [`RoomClient`] against an in-memory server.
//!
//! Every test runs on a paused clock so drift, debounce and backoff timings
//! are exact.

mod common;

use std::time::Duration;

use common::{
    current_song_json, recv_until, room_info_json, room_joined_json, song_json, state_update_json,
    MockConnector, MockServer,
};
use room_sync_client::close_code::CloseCode;
use room_sync_client::reconciler::{PlaybackSnapshot, ReconcilerState};
use room_sync_client::{
    ConnectionStatus, Identity, PlayerCommand, RoomClient, RoomEvent, RoomSyncError,
    SessionConfig, StaticTokenProvider, SyncConfig,
};
use serde_json::json;
use tokio::sync::mpsc;

struct Harness {
    client: RoomClient,
    events: mpsc::Receiver<RoomEvent>,
    server: MockServer,
    connector: MockConnector,
}

fn start_client() -> Harness {
    let connector = MockConnector::new();
    let server = connector.add_connection();
    let (client, events) = RoomClient::start(
        connector.clone(),
        StaticTokenProvider::new("tok-123"),
        Identity::new("user-1", "Ada"),
        SessionConfig::new(),
        SyncConfig::new(),
    );
    Harness {
        client,
        events,
        server,
        connector,
    }
}

/// Start a client, join room `abc` and wait until the server's room info
/// has been applied.
async fn joined_room(is_admin: bool) -> Harness {
    let mut h = start_client();
    h.client.join("abc", None).unwrap();

    let join = h.server.next_sent_of("join-room").await;
    assert_eq!(join["data"]["spaceId"], "abc");
    assert_eq!(join["data"]["token"], "tok-123");
    assert_eq!(join["data"]["userId"], "user-1");

    h.server.push("room-joined", room_joined_json("abc"));
    h.server.push("room-info", room_info_json(is_admin, 2));
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Membership(m) if m.member_count == 2 && m.is_admin == is_admin)
    })
    .await;
    h
}

fn is_seek_to(event: &RoomEvent) -> bool {
    matches!(event, RoomEvent::Player(PlayerCommand::SeekTo(_)))
}

// ════════════════════════════════════════════════════════════════════
// Clock reconciliation
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn listener_follows_server_clock_with_drift_tolerance() {
    let mut h = joined_room(false).await;

    h.server
        .push("current-song-update", current_song_json("x", 40.0, true));
    let (load, _) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::Load { .. }))
    })
    .await;
    match load {
        RoomEvent::Player(PlayerCommand::Load {
            song,
            position,
            play,
        }) => {
            assert_eq!(song.id, "x");
            assert_eq!(position, 40.0);
            assert!(play);
        }
        other => panic!("expected Load, got {other:?}"),
    }

    h.client.media_ready().unwrap();
    let (_, skipped) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Playback(s) if s.media_ready)
    })
    .await;
    assert!(skipped.contains(&RoomEvent::Player(PlayerCommand::Play)));

    // Two seconds later the server agrees with the local clock.
    tokio::time::advance(Duration::from_secs(2)).await;
    h.server
        .push("playback-state-update", state_update_json("x", 42.0, true));
    let (snapshot, skipped) =
        recv_until(&mut h.events, |e| matches!(e, RoomEvent::Playback(_))).await;
    assert!(!skipped.iter().any(is_seek_to), "no correction expected");
    match snapshot {
        RoomEvent::Playback(s) => assert!((s.position_secs - 42.0).abs() < 0.01),
        other => panic!("expected Playback, got {other:?}"),
    }

    // A jump well past the threshold is corrected exactly once.
    h.server
        .push("playback-state-update", state_update_json("x", 61.0, true));
    let (_, skipped) = recv_until(&mut h.events, |e| matches!(e, RoomEvent::Playback(_))).await;
    let seeks: Vec<_> = skipped.iter().filter(|e| is_seek_to(e)).collect();
    assert_eq!(seeks, vec![&RoomEvent::Player(PlayerCommand::SeekTo(61.0))]);
}

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_for_previous_song_is_ignored() {
    let mut h = joined_room(false).await;

    h.server
        .push("current-song-update", current_song_json("y", 5.0, true));
    recv_until(&mut h.events, |e| matches!(e, RoomEvent::Playback(_))).await;

    h.server
        .push("playback-state-update", state_update_json("x", 200.0, true));
    h.server
        .push("playback-state-update", state_update_json("y", 5.0, true));
    for _ in 0..2 {
        let (snapshot, _) =
            recv_until(&mut h.events, |e| matches!(e, RoomEvent::Playback(_))).await;
        match snapshot {
            RoomEvent::Playback(s) => {
                assert_eq!(s.track_id.as_deref(), Some("y"));
                assert!(s.position_secs < 10.0, "jumped to {}", s.position_secs);
            }
            other => panic!("expected Playback, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn room_joined_playback_state_loads_the_track() {
    let mut h = start_client();
    h.client.join("abc", None).unwrap();
    h.server.next_sent_of("join-room").await;

    h.server.push(
        "room-joined",
        json!({
            "spaceId": "abc",
            "playbackState": {
                "currentSong": song_json("z", 0, "2024-01-01T00:00:00Z"),
                "shouldStartAt": 12.5,
                "isPlaying": false
            }
        }),
    );
    let (load, _) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::Load { .. }))
    })
    .await;
    assert!(matches!(
        load,
        RoomEvent::Player(PlayerCommand::Load { position, play: false, .. }) if position == 12.5
    ));
}

// ════════════════════════════════════════════════════════════════════
// Admin commands
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn listener_commands_are_never_sent() {
    let mut h = joined_room(false).await;

    h.client.request_seek(100.0).unwrap();
    h.client.request_skip_next().unwrap();
    h.client.request_empty_queue().unwrap();
    // Volume is local and always honoured; its event marks the point where
    // every earlier intent has been handled.
    h.client.request_volume_change(0.5).unwrap();
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::SetVolume(_)))
    })
    .await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent: Vec<_> = h
        .server
        .drain_sent()
        .into_iter()
        .map(|f| f["type"].as_str().unwrap_or_default().to_string())
        .collect();
    for kind in ["seek-playback", "play-next", "empty-queue"] {
        assert!(!sent.iter().any(|s| s == kind), "{kind} leaked: {sent:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn rapid_admin_seeks_collapse_to_the_last_target() {
    let mut h = joined_room(true).await;

    h.client.request_seek(30.0).unwrap();
    h.client.request_seek(45.0).unwrap();
    h.client.request_seek(60.0).unwrap();

    let seek = h.server.next_sent_of("seek-playback").await;
    assert_eq!(seek["data"]["seekTime"], 60.0);
    assert_eq!(seek["data"]["spaceId"], "abc");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h
        .server
        .drain_sent()
        .iter()
        .any(|f| f["type"] == "seek-playback"));
}

#[tokio::test(start_paused = true)]
async fn admin_pause_reports_the_local_position() {
    let mut h = joined_room(true).await;
    h.server
        .push("current-song-update", current_song_json("x", 10.0, true));
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::Load { .. }))
    })
    .await;

    tokio::time::advance(Duration::from_secs(5)).await;
    h.client.request_play_pause().unwrap();
    let pause = h.server.next_sent_of("pause-playback").await;
    let at = pause["data"]["currentTime"].as_f64().unwrap();
    assert!((at - 15.0).abs() < 0.01, "paused at {at}");
}

#[tokio::test(start_paused = true)]
async fn admin_flag_follows_the_server() {
    let mut h = joined_room(true).await;
    assert!(h.client.is_admin());

    h.server.push("room-info", room_info_json(false, 2));
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Membership(m) if !m.is_admin)
    })
    .await;
    assert!(!h.client.is_admin());
    assert!(!h.client.membership().await.is_admin);
}

/// Load track `x` paused at `position` and report the media as ready.
async fn load_paused(h: &mut Harness, position: f64) {
    h.server
        .push("current-song-update", current_song_json("x", position, false));
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::Load { .. }))
    })
    .await;
    h.client.media_ready().unwrap();
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Playback(s) if s.media_ready)
    })
    .await;
}

/// Wait until every intent sent so far has been handled.
async fn settle_intents(h: &mut Harness) -> Vec<RoomEvent> {
    h.client.request_volume_change(0.5).unwrap();
    let (_, skipped) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::SetVolume(_)))
    })
    .await;
    skipped
}

fn playback(event: RoomEvent) -> PlaybackSnapshot {
    match event {
        RoomEvent::Playback(snapshot) => snapshot,
        other => panic!("expected Playback, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn admin_drag_sends_one_seek_and_ignores_the_server_until_echoed() {
    let mut h = joined_room(true).await;
    load_paused(&mut h, 10.0).await;

    h.client.begin_seek(30.0).unwrap();
    h.client.update_seek(45.0).unwrap();
    h.client.update_seek(60.0).unwrap();
    let skipped = settle_intents(&mut h).await;
    assert!(!skipped.iter().any(is_seek_to), "drag must not move the media");

    // A heartbeat mid-drag leaves the play head alone.
    h.server
        .push("playback-state-update", state_update_json("x", 100.0, false));
    let (event, skipped) =
        recv_until(&mut h.events, |e| matches!(e, RoomEvent::Playback(_))).await;
    assert!(!skipped.iter().any(is_seek_to));
    let snapshot = playback(event);
    assert_eq!(snapshot.state, ReconcilerState::Seeking);
    assert_eq!(snapshot.position_secs, 10.0);
    assert_eq!(snapshot.pending_seek.map(|p| p.target_secs), Some(60.0));

    h.client.commit_seek().unwrap();
    recv_until(&mut h.events, |e| {
        *e == RoomEvent::Player(PlayerCommand::SeekTo(60.0))
    })
    .await;
    let (event, _) = recv_until(&mut h.events, |e| matches!(e, RoomEvent::Playback(_))).await;
    let snapshot = playback(event);
    assert_eq!(snapshot.state, ReconcilerState::Loaded);
    assert_eq!(snapshot.position_secs, 60.0);
    assert!(snapshot.pending_seek.is_some(), "echo guard armed");

    let seek = h.server.next_sent_of("seek-playback").await;
    assert_eq!(seek["data"]["seekTime"], 60.0);

    // The server's echo ends the guard early.
    h.server
        .push("playback-seeked", json!({ "seekTime": 60.0, "songId": "x" }));
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Playback(s) if s.pending_seek.is_none())
    })
    .await;

    // So a real correction applies straight away.
    h.server
        .push("playback-state-update", state_update_json("x", 80.0, false));
    recv_until(&mut h.events, |e| {
        *e == RoomEvent::Player(PlayerCommand::SeekTo(80.0))
    })
    .await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h
        .server
        .drain_sent()
        .iter()
        .any(|f| f["type"] == "seek-playback"));
}

#[tokio::test(start_paused = true)]
async fn losing_admin_mid_drag_abandons_the_seek() {
    let mut h = joined_room(true).await;
    load_paused(&mut h, 40.0).await;

    h.client.begin_seek(90.0).unwrap();
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Playback(s) if s.state == ReconcilerState::Seeking)
    })
    .await;

    h.server.push("room-info", room_info_json(false, 2));
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Membership(m) if !m.is_admin)
    })
    .await;

    h.client.commit_seek().unwrap();
    let skipped = settle_intents(&mut h).await;
    assert!(!skipped.iter().any(is_seek_to), "denied seek reached the media");
    let snapshot = skipped
        .into_iter()
        .rev()
        .find_map(|e| match e {
            RoomEvent::Playback(s) => Some(s),
            _ => None,
        })
        .expect("commit publishes a snapshot");
    assert_eq!(snapshot.state, ReconcilerState::Loaded);
    assert_eq!(snapshot.position_secs, 40.0);
    assert!(snapshot.pending_seek.is_none());

    // No guard is left behind: the server's clock applies immediately.
    h.server
        .push("playback-state-update", state_update_json("x", 50.0, false));
    recv_until(&mut h.events, |e| {
        *e == RoomEvent::Player(PlayerCommand::SeekTo(50.0))
    })
    .await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h
        .server
        .drain_sent()
        .iter()
        .any(|f| f["type"] == "seek-playback"));
}

// ════════════════════════════════════════════════════════════════════
// Membership
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn missing_current_song_is_fetched_after_fallback() {
    let mut h = joined_room(false).await;
    let fetch = h.server.next_sent_of("get-current-song").await;
    assert_eq!(fetch["data"]["spaceId"], "abc");
}

#[tokio::test(start_paused = true)]
async fn roster_changes_trigger_a_refresh() {
    let mut h = joined_room(false).await;

    h.server.push("user-joined", json!({ "userId": "u2" }));
    h.server.next_sent_of("get-room-users").await;
    h.server.push(
        "user-update",
        json!({
            "userCount": 2,
            "userDetails": [
                { "id": "user-1", "name": "Ada", "isCreator": false },
                { "id": "u2", "name": "Grace", "imageUrl": "https://img/g.png", "isCreator": true }
            ]
        }),
    );
    let (event, _) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Membership(m) if m.members.len() == 2)
    })
    .await;
    match event {
        RoomEvent::Membership(m) => {
            assert_eq!(m.member_count, 2);
            assert_eq!(m.members[1].display_name, "Grace");
            assert!(m.members[1].is_creator);
        }
        other => panic!("expected Membership, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unauthorized_errors_back_off_then_give_up() {
    let mut h = joined_room(false).await;

    for _ in 0..2 {
        h.server
            .push("error", json!({ "message": "Unauthorized: token expired" }));
        let rejoin = h.server.next_sent_of("join-room").await;
        assert_eq!(rejoin["data"]["spaceId"], "abc");
    }
    h.server
        .push("error", json!({ "message": "Unauthorized: token expired" }));
    let (event, _) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::AuthorizationExhausted { .. })
    })
    .await;
    assert_eq!(event, RoomEvent::AuthorizationExhausted { attempts: 3 });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!h
        .server
        .drain_sent()
        .iter()
        .any(|f| f["type"] == "join-room"));
}

#[tokio::test(start_paused = true)]
async fn other_server_errors_are_surfaced() {
    let mut h = joined_room(false).await;
    h.server.push(
        "error",
        json!({ "message": "Song already in queue", "code": "DUPLICATE" }),
    );
    let (event, _) =
        recv_until(&mut h.events, |e| matches!(e, RoomEvent::ServerError { .. })).await;
    assert_eq!(
        event,
        RoomEvent::ServerError {
            message: "Song already in queue".into(),
            code: Some("DUPLICATE".into()),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn ended_room_stops_admin_commands() {
    let mut h = joined_room(true).await;
    h.server
        .push("space-ended", json!({ "reason": "host closed the room" }));
    let (event, _) =
        recv_until(&mut h.events, |e| matches!(e, RoomEvent::RoomEnded { .. })).await;
    assert_eq!(
        event,
        RoomEvent::RoomEnded {
            reason: Some("host closed the room".into())
        }
    );

    h.client.request_skip_next().unwrap();
    h.client.toggle_mute().unwrap();
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Player(PlayerCommand::SetMuted(true)))
    })
    .await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h
        .server
        .drain_sent()
        .iter()
        .any(|f| f["type"] == "play-next"));
}

// ════════════════════════════════════════════════════════════════════
// Reconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn reconnect_rejoins_and_refreshes_room_state() {
    let mut h = joined_room(false).await;
    let mut second = h.connector.add_connection();

    h.server.drop_connection();
    recv_until(&mut h.events, |e| {
        matches!(
            e,
            RoomEvent::Connection(ConnectionStatus::Reconnecting { attempt: 1 })
        )
    })
    .await;

    let kinds = [
        "join-room",
        "get-queue",
        "get-current-song",
        "get-room-users",
    ];
    for kind in kinds {
        let frame = second.next_sent().await;
        assert_eq!(frame["type"], kind);
        assert_eq!(frame["data"]["spaceId"], "abc");
    }
    recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Connection(ConnectionStatus::Ready))
    })
    .await;
    assert_eq!(h.connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_token_leaves_status_failed() {
    let connector = MockConnector::new();
    let server = connector.add_connection();
    let (client, mut events) = RoomClient::start(
        connector,
        StaticTokenProvider::new(""),
        Identity::new("user-1", "Ada"),
        SessionConfig::new(),
        SyncConfig::new(),
    );

    recv_until(&mut events, |e| {
        matches!(e, RoomEvent::Connection(ConnectionStatus::Failed { .. }))
    })
    .await;
    recv_until(&mut events, |e| matches!(e, RoomEvent::Closed)).await;
    assert!(events.recv().await.is_none());

    assert!(matches!(
        client.connection_status().await,
        ConnectionStatus::Failed { .. }
    ));
    assert_eq!(server.closed_with(), Some(CloseCode::INVALID_TOKEN));
    assert!(matches!(
        client.join("abc", None),
        Err(RoomSyncError::NotConnected)
    ));
}

// ════════════════════════════════════════════════════════════════════
// Queue
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn votes_toggle_and_reorder_the_queue() {
    let mut h = joined_room(false).await;
    h.server.push(
        "queue-update",
        json!({
            "queue": [
                song_json("b", 1, "2024-01-01T00:00:10Z"),
                song_json("a", 2, "2024-01-01T00:00:20Z"),
            ]
        }),
    );
    let (event, _) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Queue { entries, .. } if entries.len() == 2)
    })
    .await;
    let order = |event: &RoomEvent| match event {
        RoomEvent::Queue { entries, .. } => {
            entries.iter().map(|e| e.id.clone()).collect::<Vec<_>>()
        }
        other => panic!("expected Queue, got {other:?}"),
    };
    assert_eq!(order(&event), ["a", "b"]);

    // Tie on votes: the older entry wins.
    h.client.vote("b").unwrap();
    let vote = h.server.next_sent_of("vote").await;
    assert_eq!(vote["data"]["streamId"], "b");
    assert_eq!(vote["data"]["vote"], "upvote");
    let (event, _) = recv_until(&mut h.events, |e| matches!(e, RoomEvent::Queue { .. })).await;
    assert_eq!(order(&event), ["b", "a"]);

    h.client.vote("b").unwrap();
    let vote = h.server.next_sent_of("vote").await;
    assert_eq!(vote["data"]["vote"], "downvote");
    let (event, _) = recv_until(&mut h.events, |e| matches!(e, RoomEvent::Queue { .. })).await;
    assert_eq!(order(&event), ["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn now_playing_song_leaves_the_queue() {
    let mut h = joined_room(false).await;
    h.server.push(
        "queue-update",
        json!({ "queue": [song_json("a", 0, "2024-01-01T00:00:10Z"), song_json("x", 0, "2024-01-01T00:00:20Z")] }),
    );
    h.server
        .push("current-song-update", current_song_json("x", 0.0, true));
    let (event, _) = recv_until(&mut h.events, |e| {
        matches!(e, RoomEvent::Queue { now_playing: Some(_), .. })
    })
    .await;
    match event {
        RoomEvent::Queue {
            entries,
            now_playing,
        } => {
            assert_eq!(now_playing.unwrap().id, "x");
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].id, "a");
        }
        other => panic!("expected Queue, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn add_to_queue_validates_links() {
    let mut h = joined_room(false).await;

    let err = h
        .client
        .add_to_queue("https://example.com/song.mp3")
        .unwrap_err();
    assert!(matches!(err, RoomSyncError::InvalidUrl(_)));

    h.client
        .add_to_queue("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        .unwrap();
    let add = h.server.next_sent_of("add-to-queue").await;
    assert_eq!(add["data"]["url"], "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    assert_eq!(add["data"]["userId"], "user-1");
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_the_room_and_closes_normally() {
    let mut h = joined_room(false).await;

    h.client.shutdown().await;
    let leave = h.server.next_sent_of("leave-room").await;
    assert_eq!(leave["data"]["spaceId"], "abc");
    assert_eq!(h.server.closed_with(), Some(CloseCode::NORMAL));

    recv_until(&mut h.events, |e| matches!(e, RoomEvent::Closed)).await;
    assert!(h.events.recv().await.is_none());
}
