//! WebSocket transport built on `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries room frames as WebSocket text messages and
//! reports server close frames with their close code, which the session needs
//! to decide between reconnecting and giving up. [`WebSocketConnector`] opens
//! a new transport for every (re)connect attempt.
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), room_sync_client::RoomSyncError> {
//! use room_sync_client::close_code::CloseCode;
//! use room_sync_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:8080").await?;
//! ws.send(r#"{"type":"get-queue","data":{"spaceId":"abc"}}"#.to_string()).await?;
//! ws.close(CloseCode::NORMAL, "bye").await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::close_code::CloseCode;
use crate::error::RoomSyncError;
use crate::transport::{Connector, Transport};

/// Default limit for opening a WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The underlying stream type, public so callers can build one themselves and
/// hand it to [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] over one WebSocket connection.
///
/// `ws://` and `wss://` both work; TLS comes from
/// [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) only awaits `StreamExt::next`, which is
/// cancel-safe, so it can sit inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::Io`] if the URL is invalid or the handshake
    /// fails. I/O error kinds are preserved; everything else maps to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, RoomSyncError> {
        tracing::debug!(url = %url, "opening room websocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            RoomSyncError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "room websocket open");
        Ok(Self::from_stream(stream))
    }

    /// Wrap a stream that was opened elsewhere (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::Timeout`] when the deadline passes first.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, RoomSyncError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| RoomSyncError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomSyncError> {
        if self.closed {
            return Err(RoomSyncError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| RoomSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RoomSyncError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(RoomSyncError::TransportReceive(e.to_string()))),
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(Some(frame)) => {
                    let code = CloseCode(u16::from(frame.code));
                    tracing::debug!(%code, reason = %frame.reason, "server closed the websocket");
                    return Some(Err(RoomSyncError::ClosedByPeer {
                        code,
                        reason: frame.reason.to_string(),
                    }));
                }
                // A close frame without a payload means "no status received".
                Message::Close(None) => {
                    return Some(Err(RoomSyncError::ClosedByPeer {
                        code: CloseCode(1005),
                        reason: String::new(),
                    }));
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("dropping binary websocket frame; the room protocol is text-only");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), RoomSyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame {
            code: code.0.into(),
            reason: reason.to_owned().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| RoomSyncError::TransportSend(e.to_string()))
    }
}

/// A [`Connector`] that dials the same WebSocket URL on every attempt.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url` with the default 10 second connect timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The URL this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&mut self) -> Result<WebSocketTransport, RoomSyncError> {
        WebSocketTransport::connect_with_timeout(&self.url, self.connect_timeout).await
    }
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
    use tokio::net::TcpListener;

    /// Accept one websocket connection on a local port and hand it to `handler`.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn transport_is_send_and_debug() {
        fn assert_bounds<T: Send + std::fmt::Debug>() {}
        assert_bounds::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn invalid_url_is_an_io_error() {
        let err = WebSocketTransport::connect("definitely not a url")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomSyncError::Io(_)));
    }

    #[tokio::test]
    async fn text_frames_arrive_in_order() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text(r#"{"type":"a"}"#.into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"b"}"#.into())).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"type":"a"}"#);
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"type":"b"}"#);
    }

    #[tokio::test]
    async fn close_frame_reports_its_code() {
        let url = serve_once(|mut ws| async move {
            let frame = CloseFrame {
                code: 4001u16.into(),
                reason: "invalid token".to_owned().into(),
            };
            ws.close(Some(frame)).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        match transport.recv().await {
            Some(Err(RoomSyncError::ClosedByPeer { code, reason })) => {
                assert_eq!(code, CloseCode::INVALID_TOKEN);
                assert_eq!(reason, "invalid token");
            }
            other => panic!("expected ClosedByPeer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Text("after".into())).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after");
    }

    #[tokio::test]
    async fn send_after_close_fails_and_close_is_idempotent() {
        let url =
            serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close(CloseCode::NORMAL, "done").await.unwrap();
        transport.close(CloseCode::NORMAL, "done").await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, RoomSyncError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_times_out_on_unroutable_address() {
        let mut connector =
            WebSocketConnector::new("ws://192.0.2.1:1").with_connect_timeout(Duration::from_millis(50));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, RoomSyncError::Timeout));
    }

    #[tokio::test]
    async fn connector_echo_round_trip() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
        })
        .await;

        let mut connector = WebSocketConnector::new(url);
        let mut transport = connector.connect().await.unwrap();
        transport.send("echo".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "echo");
    }
}
