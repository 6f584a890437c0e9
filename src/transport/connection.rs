//! WebSocket connection built on `tokio-tungstenite`.
//!
//! [`WsConnector`] is the default [`Connector`]. Each successful attempt
//! yields a [`WsConnection`] whose read and write halves are split so the
//! read pump can block in a receive while the write pump sends.
//!
//! Fragment reassembly happens inside tungstenite, so every text message
//! surfaces as a single fragment with `end_of_message` set. Ping and pong
//! control frames are answered by tungstenite and never reach the pumps.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::socket::{ConnectionState, Connector, Fragment, Socket};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WsConnector
// ============================================================================

/// Connects over plain or TLS WebSockets with `tokio-tungstenite`.
///
/// `wss://` targets need the `tls` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &Url) -> Result<Box<dyn Socket>> {
        let (ws_stream, response) = connect_async(target.as_str())
            .await
            .map_err(|e| Error::connection(format!("handshake with {target} failed: {e}")))?;

        let connection = WsConnection::new(ws_stream);

        debug!(
            connection = %connection.id,
            status = %response.status(),
            "WebSocket handshake complete"
        );

        Ok(Box::new(connection))
    }
}

// ============================================================================
// WsConnection
// ============================================================================

/// One live `tokio-tungstenite` connection.
pub struct WsConnection {
    /// Instance identifier.
    id: ConnectionId,
    /// Write half, used by the write pump and close.
    sink: AsyncMutex<SplitSink<WsStream, Message>>,
    /// Read half, used by the read pump.
    stream: AsyncMutex<SplitStream<WsStream>>,
    /// Socket-level state.
    state: Mutex<ConnectionState>,
}

impl WsConnection {
    /// Wraps an established stream.
    fn new(ws_stream: WsStream) -> Self {
        let (sink, stream) = ws_stream.split();

        Self {
            id: ConnectionId::generate(),
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(stream),
            state: Mutex::new(ConnectionState::Open),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl Socket for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv_fragment(&self) -> Result<Fragment> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(connection = %self.id, len = text.len(), "Text message received");
                    return Ok(Fragment::text(text.as_str().as_bytes(), true));
                }

                Some(Ok(Message::Binary(data))) => {
                    return Ok(Fragment::binary(data.to_vec()));
                }

                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, ?frame, "Close frame received");
                    self.set_state(ConnectionState::Closing);
                    return Ok(Fragment::close());
                }

                // Ping, Pong and raw frames are handled by tungstenite
                Some(Ok(_)) => {}

                Some(Err(e)) => {
                    self.set_state(ConnectionState::Aborted);
                    return Err(Error::WebSocket(e));
                }

                None => {
                    self.set_state(ConnectionState::Aborted);
                    return Err(Error::ConnectionClosed);
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.set_state(ConnectionState::Closing);
        let result = self.sink.lock().await.close().await;
        self.set_state(ConnectionState::Closed);
        result.map_err(Error::WebSocket)
    }
}
