//! # Room Sync Client
//!
//! Transport-agnostic Rust client for collaborative listening rooms.
//!
//! A room has one admin who controls playback, any number of listeners who
//! hear the same track at the same position, and a queue ranked by votes.
//! This crate implements the client side of the room's real-time protocol:
//! connecting and reconnecting, keeping the local playback clock in step
//! with the server, gating admin commands and projecting the queue.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **WebSocket built-in**: default `transport-websocket` feature provides [`WebSocketConnector`]
//! - **Drift-tolerant clock**: small drift is left alone, large drift is corrected once
//! - **Event-driven**: media commands and UI snapshots arrive as typed [`RoomEvent`]s
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn example() -> Result<(), room_sync_client::RoomSyncError> {
//! use room_sync_client::{
//!     Identity, RoomClient, RoomEvent, SessionConfig, StaticTokenProvider, SyncConfig,
//!     WebSocketConnector,
//! };
//!
//! let (client, mut events) = RoomClient::start(
//!     WebSocketConnector::new("wss://rooms.example.com"),
//!     StaticTokenProvider::new("token-from-your-auth-endpoint"),
//!     Identity::new("user-1", "Ada"),
//!     SessionConfig::new(),
//!     SyncConfig::new(),
//! );
//! client.join("abc", None)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RoomEvent::Player(command) => println!("player: {command:?}"),
//!         RoomEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod close_code;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod membership;
pub mod protocol;
pub mod queue;
pub mod reconciler;
pub mod room;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use auth::{Identity, StaticTokenProvider, TokenProvider};
pub use close_code::CloseCode;
pub use config::SyncConfig;
pub use error::{Result, RoomSyncError};
pub use event::{ConnectionStatus, PlayerCommand, RoomEvent, SessionEvent};
pub use protocol::{ClientMessage, ServerMessage};
pub use room::RoomClient;
pub use session::{ConnectionState, RoomSession, SessionConfig};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
