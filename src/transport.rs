//! Transport abstraction for the room sync protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and the room server. Every frame is one JSON text message, so
//! implementations handle framing internally (WebSocket frames, length-prefixed
//! TCP, an in-memory channel in tests).
//!
//! # Connection Setup
//!
//! A [`Transport`] is an already-open connection. Opening one is the job of a
//! [`Connector`], which the session calls once at start-up and again for every
//! reconnect attempt. Different transports take different parameters (URLs for
//! WebSocket, host:port for TCP), so those live on the connector, not here.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use room_sync_client::close_code::CloseCode;
//! use room_sync_client::error::RoomSyncError;
//! use room_sync_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RoomSyncError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RoomSyncError>> {
//!         // Receive the next JSON text message.
//!         // Report a close frame as Some(Err(RoomSyncError::ClosedByPeer { .. }))
//!         // and a dropped connection as None.
//!         todo!()
//!     }
//!
//!     async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), RoomSyncError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::close_code::CloseCode;
use crate::error::RoomSyncError;

/// A bidirectional text message transport for the room sync protocol.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), RoomSyncError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(RoomSyncError::ClosedByPeer { .. }))`: the server sent a close frame
    /// - `Some(Err(e))`: any other transport error
    /// - `None`: the connection ended without a close frame (treated as code 1006)
    async fn recv(&mut self) -> Option<Result<String, RoomSyncError>>;

    /// Close the connection with the given close code and reason.
    ///
    /// Must be idempotent. Implementations should release resources even if
    /// the close handshake fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails.
    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), RoomSyncError>;
}

/// Opens fresh [`Transport`] connections to the room server.
///
/// The session owns its connector for its whole lifetime and calls
/// [`connect`](Connector::connect) once per connection attempt.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport produced by this connector.
    type Transport: Transport;

    /// Open a new raw connection (phase one of the handshake).
    ///
    /// # Errors
    ///
    /// Any error is treated as an abnormal closure and goes through the
    /// reconnect policy.
    async fn connect(&mut self) -> Result<Self::Transport, RoomSyncError>;
}
