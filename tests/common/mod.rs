#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for room sync integration tests.
//!
//! Provides a channel-based [`MockTransport`], a [`MockConnector`] that hands
//! out pre-registered transports one per connect call, and helpers for
//! building server frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use room_sync_client::close_code::CloseCode;
use room_sync_client::{Connector, RoomEvent, RoomSyncError, Transport};
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

/// What the fake server pushes to the client.
#[derive(Debug)]
pub enum ServerPush {
    Frame(String),
    Close(CloseCode, String),
    Drop,
}

/// Client half of an in-memory connection.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<ServerPush>,
    outgoing: mpsc::UnboundedSender<String>,
    closed_with: Arc<StdMutex<Option<CloseCode>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomSyncError> {
        self.outgoing
            .send(message)
            .map_err(|e| RoomSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RoomSyncError>> {
        match self.incoming.recv().await {
            Some(ServerPush::Frame(text)) => Some(Ok(text)),
            Some(ServerPush::Close(code, reason)) => {
                Some(Err(RoomSyncError::ClosedByPeer { code, reason }))
            }
            Some(ServerPush::Drop) | None => None,
        }
    }

    async fn close(&mut self, code: CloseCode, _reason: &str) -> Result<(), RoomSyncError> {
        *self.closed_with.lock().unwrap() = Some(code);
        Ok(())
    }
}

/// Server half of an in-memory connection: push frames, read what the client sent.
pub struct MockServer {
    tx: mpsc::UnboundedSender<ServerPush>,
    rx: mpsc::UnboundedReceiver<String>,
    closed_with: Arc<StdMutex<Option<CloseCode>>>,
}

impl MockServer {
    /// Push one `{type, data}` frame.
    pub fn push(&self, kind: &str, data: Value) {
        let frame = json!({ "type": kind, "data": data }).to_string();
        self.tx.send(ServerPush::Frame(frame)).unwrap();
    }

    /// Push raw text, e.g. a malformed frame.
    pub fn push_raw(&self, text: &str) {
        self.tx.send(ServerPush::Frame(text.to_string())).unwrap();
    }

    /// Close the connection with a close frame.
    pub fn close(&self, code: CloseCode) {
        self.tx
            .send(ServerPush::Close(code, code.description().to_string()))
            .unwrap();
    }

    /// Drop the connection without a close frame.
    pub fn drop_connection(&self) {
        self.tx.send(ServerPush::Drop).unwrap();
    }

    /// Wait for the next frame the client sent.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(30), self.rx.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport gone");
        serde_json::from_str(&text).unwrap()
    }

    /// Wait for the next client frame of type `kind`, skipping others.
    pub async fn next_sent_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next_sent().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    /// Every frame sent so far that has not been read yet.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Close code the client used, if it closed the connection.
    pub fn closed_with(&self) -> Option<CloseCode> {
        *self.closed_with.lock().unwrap()
    }
}

/// Create a connected `(transport, server)` pair.
pub fn mock_pair() -> (MockTransport, MockServer) {
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let closed_with = Arc::new(StdMutex::new(None));
    let transport = MockTransport {
        incoming: push_rx,
        outgoing: sent_tx,
        closed_with: Arc::clone(&closed_with),
    };
    let server = MockServer {
        tx: push_tx,
        rx: sent_rx,
        closed_with,
    };
    (transport, server)
}

// ── MockConnector ───────────────────────────────────────────────────

/// Connector that hands out pre-registered transports in order and fails
/// once they run out. Clones share state, so tests keep one to inspect.
#[derive(Clone, Default)]
pub struct MockConnector {
    transports: Arc<StdMutex<VecDeque<MockTransport>>>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the transport for the next successful connect.
    pub fn add_connection(&self) -> MockServer {
        let (transport, server) = mock_pair();
        self.transports.lock().unwrap().push_back(transport);
        server
    }

    /// Number of connect calls so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, RoomSyncError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.transports.lock().unwrap().pop_front().ok_or_else(|| {
            RoomSyncError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no server",
            ))
        })
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Receive room events until one matches `pred`, returning it and
/// everything received before it.
pub async fn recv_until<F>(
    events: &mut mpsc::Receiver<RoomEvent>,
    mut pred: F,
) -> (RoomEvent, Vec<RoomEvent>)
where
    F: FnMut(&RoomEvent) -> bool,
{
    let mut skipped = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for a room event")
            .expect("room event channel closed");
        if pred(&event) {
            return (event, skipped);
        }
        skipped.push(event);
    }
}

// ── JSON helpers ────────────────────────────────────────────────────

/// A YouTube song payload as the server sends it.
pub fn song_json(id: &str, votes: u32, create_at: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Song {id}"),
        "artist": "Artist",
        "url": format!("https://youtu.be/{id}"),
        "smallImg": "",
        "bigImg": "",
        "type": "Youtube",
        "voteCount": votes,
        "createAt": create_at,
        "addedByUser": { "id": "u-host", "username": "host" },
        "upvotes": []
    })
}

pub fn room_joined_json(space_id: &str) -> Value {
    json!({ "spaceId": space_id, "userId": "me", "message": "joined" })
}

pub fn room_info_json(is_admin: bool, user_count: u32) -> Value {
    json!({ "isAdmin": is_admin, "userCount": user_count, "spaceName": "Late Night" })
}

pub fn current_song_json(id: &str, current_time: f64, is_playing: bool) -> Value {
    json!({
        "song": song_json(id, 0, "2024-01-01T00:00:00Z"),
        "currentTime": current_time,
        "isPlaying": is_playing
    })
}

pub fn state_update_json(id: &str, current_time: f64, is_playing: bool) -> Value {
    json!({ "currentTime": current_time, "isPlaying": is_playing, "songId": id })
}
