//! # Custom Transport Example
//!
//! Shows how to implement [`Transport`] and [`Connector`] with an in-process
//! loopback channel and drive a [`RoomClient`] against a scripted server.
//! This is useful for:
//!
//! - **Testing**: exercise player logic without a real server
//! - **Custom backends**: adapt any I/O layer (TCP, QUIC, WebRTC data channels)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use async_trait::async_trait;
use room_sync_client::{
    CloseCode, Connector, Identity, PlayerCommand, RoomClient, RoomEvent, RoomSyncError,
    SessionConfig, StaticTokenProvider, SyncConfig, Transport,
};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback: implements [`Transport`].
pub struct LoopbackTransport {
    /// Frames the client sends go here (the server reads the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Frames the server sends arrive here.
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of the loopback: inject frames and read what the client sent.
pub struct LoopbackServer {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement Transport and Connector
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomSyncError> {
        self.tx
            .send(message)
            .map_err(|e| RoomSyncError::TransportSend(e.to_string()))
    }

    /// `None` once the server half is dropped; the session treats that as an
    /// abnormal closure and reconnects.
    ///
    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is cancel-safe.
    async fn recv(&mut self) -> Option<Result<String, RoomSyncError>> {
        self.rx.recv().await.map(Ok)
    }

    /// Channels have no close handshake; dropping is enough.
    async fn close(&mut self, _code: CloseCode, _reason: &str) -> Result<(), RoomSyncError> {
        Ok(())
    }
}

/// Hands out a single pre-built transport. Reconnects fail, which the
/// session reports after its retry budget is spent.
struct LoopbackConnector {
    transport: Option<LoopbackTransport>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&mut self) -> Result<LoopbackTransport, RoomSyncError> {
        self.transport.take().ok_or(RoomSyncError::TransportClosed)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the client and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut server) = loopback_pair();
    let connector = LoopbackConnector {
        transport: Some(transport),
    };
    let (mut client, mut events) = RoomClient::start(
        connector,
        StaticTokenProvider::new("demo-token"),
        Identity::new("demo-user", "Demo"),
        SessionConfig::new(),
        SyncConfig::new(),
    );
    client.join("demo-room", Some("Demo Room".into()))?;

    // ── Fake server: accept the join and announce a song ────────────
    let Some(join) = server.rx.recv().await else {
        return Err("client closed before joining".into());
    };
    tracing::info!("Server received: {join}");

    let frames = [
        json!({ "type": "room-joined", "data": { "spaceId": "demo-room" } }),
        json!({ "type": "room-info", "data": { "isAdmin": false, "userCount": 3 } }),
        json!({
            "type": "current-song-update",
            "data": {
                "song": {
                    "id": "song-1",
                    "title": "Loopback Blues",
                    "url": "https://youtu.be/dQw4w9WgXcQ",
                    "type": "Youtube"
                },
                "currentTime": 40.0,
                "isPlaying": true
            }
        }),
        // Five seconds of drift: the client corrects with a single seek.
        json!({
            "type": "playback-state-update",
            "data": { "currentTime": 45.0, "isPlaying": true, "songId": "song-1" }
        }),
    ];

    for frame in frames {
        server.tx.send(frame.to_string())?;
    }

    // ── Read events from the client ─────────────────────────────────
    let mut corrected = false;
    while let Some(event) = events.recv().await {
        match &event {
            RoomEvent::Player(PlayerCommand::Load { song, position, .. }) => {
                tracing::info!("Event: load {} at {position}s", song.title);
                // Tell the client the media element is ready for commands.
                client.media_ready()?;
            }
            RoomEvent::Player(PlayerCommand::SeekTo(at)) if *at > 44.0 => {
                tracing::info!("Event: clock corrected to {at}s");
                corrected = true;
                break;
            }
            RoomEvent::Closed => break,
            other => tracing::info!("Event: {other:?}"),
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Done. Drift corrected: {corrected}");
    Ok(())
}
