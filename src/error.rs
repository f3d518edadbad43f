//! Error types for the room sync client.

use thiserror::Error;

use crate::close_code::CloseCode;

/// Errors that can occur when using the room sync client.
#[derive(Debug, Error)]
pub enum RoomSyncError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed locally.
    #[error("transport connection closed")]
    TransportClosed,

    /// The peer closed the connection with a close frame.
    #[error("connection closed by peer ({code}): {reason}")]
    ClosedByPeer {
        /// Close code sent by the peer.
        code: CloseCode,
        /// Close reason sent by the peer (may be empty).
        reason: String,
    },

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session has not finished its handshake (no token attached yet).
    ///
    /// Callers should retry once a `Ready` event arrives instead of assuming
    /// the message was queued.
    #[error("session is not ready")]
    NotReady,

    /// The session has shut down or failed permanently.
    #[error("not connected to server")]
    NotConnected,

    /// The auth collaborator could not provide a transport token.
    #[error("transport token unavailable: {0}")]
    TokenUnavailable(String),

    /// Automatic reconnection gave up after the configured number of attempts.
    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A song URL is neither a YouTube nor a Spotify track link.
    #[error("unsupported song url: {0}")]
    InvalidUrl(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for room sync operations.
pub type Result<T> = std::result::Result<T, RoomSyncError>;
