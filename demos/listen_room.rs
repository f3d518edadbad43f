//! # Listen Room Example
//!
//! Joins a room over WebSocket and prints what a media player would be told
//! to do:
//!
//! 1. Connect and attach the transport token
//! 2. Join the room given on the command line
//! 3. Print player commands, queue changes and membership updates
//! 4. Leave the room and shut down on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! ROOM_SYNC_TOKEN=... cargo run --example listen_room -- <room-id>
//!
//! # Override the server URL and user id:
//! ROOM_SYNC_URL=wss://rooms.example.com ROOM_SYNC_USER=me \
//!     ROOM_SYNC_TOKEN=... cargo run --example listen_room -- <room-id>
//! ```

use room_sync_client::{
    ConnectionStatus, Identity, PlayerCommand, RoomClient, RoomEvent, SessionConfig,
    StaticTokenProvider, SyncConfig, WebSocketConnector,
};

/// Default server URL when `ROOM_SYNC_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=room_sync_client=debug` for protocol-level output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let Some(room_id) = std::env::args().nth(1) else {
        return Err("usage: listen_room <room-id>".into());
    };
    let url = std::env::var("ROOM_SYNC_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let token = std::env::var("ROOM_SYNC_TOKEN").unwrap_or_default();
    let user_id = std::env::var("ROOM_SYNC_USER").unwrap_or_else(|_| "listener".to_string());
    tracing::info!("Connecting to {url} as {user_id}");

    // An empty token is reported as a connection failure, not retried.
    let (mut client, mut events) = RoomClient::start(
        WebSocketConnector::new(url),
        StaticTokenProvider::new(token),
        Identity::new(user_id, "Listener"),
        SessionConfig::new(),
        SyncConfig::new(),
    );
    client.join(room_id, None)?;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    RoomEvent::Connection(ConnectionStatus::Failed { reason }) => {
                        tracing::error!("Connection failed: {reason}");
                    }
                    RoomEvent::Connection(status) => tracing::info!("Connection: {status:?}"),
                    RoomEvent::Player(PlayerCommand::Load { song, position, play }) => {
                        tracing::info!(
                            "Now playing: {} at {position:.1}s ({})",
                            song.title,
                            if play { "playing" } else { "paused" }
                        );
                        // A real player reports back once the track has loaded.
                        client.media_ready()?;
                    }
                    RoomEvent::Player(command) => tracing::info!("Player: {command:?}"),
                    RoomEvent::Queue { entries, .. } => {
                        tracing::info!("Queue: {} song(s)", entries.len());
                        for (i, entry) in entries.iter().take(5).enumerate() {
                            tracing::info!("  {}. {} [{} votes]", i + 1, entry.title, entry.vote_count);
                        }
                    }
                    RoomEvent::Membership(room) => {
                        tracing::info!(
                            "Room {:?}: {} listener(s), admin={}",
                            room.room_name,
                            room.member_count,
                            room.is_admin
                        );
                    }
                    RoomEvent::Playback(_) => {}
                    RoomEvent::AuthorizationExhausted { attempts } => {
                        tracing::error!("Server rejected us {attempts} times; giving up");
                    }
                    RoomEvent::ServerError { message, .. } => tracing::warn!("Server: {message}"),
                    RoomEvent::RoomEnded { reason } => {
                        tracing::info!("Room ended: {}", reason.as_deref().unwrap_or("no reason"));
                        break;
                    }
                    RoomEvent::Closed => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving room");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    // Sends `leave-room` if still joined, then closes with a normal code.
    client.shutdown().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}
