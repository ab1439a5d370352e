//! WebSocket transport
//!
//! Dials the feed with tokio-tungstenite and splits the stream so the read
//! half can be lent to the dispatch loop while the lifecycle manager keeps the
//! write half. Ping frames are answered by tungstenite itself; neither ping
//! nor pong reaches the dispatch loop.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    Closer, Connection, Connector, FrameSource, FrameWriter, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match e {
            Error::ConnectionClosed | Error::AlreadyClosed => Self::Closed,
            other => Self::WebSocket(other.to_string()),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Connection, TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(address).await?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok(Connection {
            source: Box::new(WsFrameSource { read }),
            writer: Box::new(WsFrameWriter {
                write,
                closed: false,
            }),
        })
    }
}

// =============================================================================
// Read half
// =============================================================================

/// Read half of a websocket connection.
pub struct WsFrameSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|e| TransportError::InvalidFrame(e.to_string())),
                    );
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Feed sent close frame");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

// =============================================================================
// Write half
// =============================================================================

/// Write half of a websocket connection.
pub struct WsFrameWriter {
    write: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.write
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl Closer for WsFrameWriter {
    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.write.close().await {
            Ok(()) => Ok(()),
            Err(e) => match TransportError::from(e) {
                TransportError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }
}
