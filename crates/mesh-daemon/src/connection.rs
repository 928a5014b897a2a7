//! One client WebSocket connection.
//!
//! The stream is split: the write half sits behind [`WsTransport`] (the
//! router's handle, shared across tasks) and the read half is driven by
//! [`serve_connection`], which feeds text frames to the router.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mesh_core::router::Disposition;
use mesh_core::transport::{self, CloseReason, ConnectionId, SessionTransport, TransportError};
use mesh_core::{Envelope, MeshRouter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

/// Maximum size of an inbound frame (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A send that takes longer than this fails the connection's send.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Write half of a client connection.
pub struct WsTransport {
    connection_id: ConnectionId,
    write: Mutex<WsSink>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl WsTransport {
    fn new(connection_id: ConnectionId, write: WsSink) -> Self {
        Self {
            connection_id,
            write: Mutex::new(write),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, message: Message) -> transport::Result<()> {
        let mut write = self.write.lock().await;
        match tokio::time::timeout(SEND_TIMEOUT, write.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                Err(TransportError::Closed)
            }
            Ok(Err(e)) => Err(TransportError::SendFailed(e.to_string())),
            Err(_) => Err(TransportError::SendFailed(format!(
                "timed out after {}ms",
                SEND_TIMEOUT.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn send(&self, envelope: &Envelope) -> transport::Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let json = envelope.to_json()?;
        self.send_frame(Message::Text(json)).await
    }

    async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection = self.connection_id, %reason, "Closing connection");

        let code = match reason {
            CloseReason::ClientClosed | CloseReason::Superseded => CloseCode::Normal,
            CloseReason::Shutdown => CloseCode::Away,
            CloseReason::AuthRejected => CloseCode::Policy,
            CloseReason::ProtocolViolation => CloseCode::Protocol,
            CloseReason::HeartbeatTimeout | CloseReason::RegistrationTimeout => CloseCode::Again,
        };
        let frame = CloseFrame {
            code,
            reason: reason.as_str().into(),
        };
        if let Err(e) = self.send_frame(Message::Close(Some(frame))).await {
            debug!(connection = self.connection_id, error = %e, "Close frame not sent");
        }
        self.close_signal.notify_one();
    }
}

/// Run a connection until either side closes it.
///
/// Registers the transport with the router, then reads frames until the
/// peer goes away, the router asks for a close, or the transport is closed
/// from elsewhere (sweep, supersede, shutdown).
pub async fn serve_connection(
    router: Arc<MeshRouter>,
    ws_stream: WebSocketStream<TcpStream>,
    connection_id: ConnectionId,
) {
    let (write, read) = ws_stream.split();
    let transport = Arc::new(WsTransport::new(connection_id, write));

    router
        .connection_opened(Arc::clone(&transport) as Arc<dyn SessionTransport>)
        .await;

    read_loop(&router, &transport, read).await;

    router.connection_closed(connection_id);
    info!(connection = connection_id, "Connection closed");
}

async fn read_loop(
    router: &MeshRouter,
    transport: &Arc<WsTransport>,
    mut read: SplitStream<WebSocketStream<TcpStream>>,
) {
    let connection_id = transport.connection_id;
    loop {
        let next = tokio::select! {
            next = read.next() => next,
            _ = transport.close_signal.notified() => {
                debug!(connection = connection_id, "Transport closed locally");
                break;
            }
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(connection = connection_id, "Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) => {
                debug!(connection = connection_id, "Received close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Err(e)) => {
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!(connection = connection_id, "Connection closed");
                    }
                    _ => {
                        error!(connection = connection_id, error = %e, "WebSocket error");
                    }
                }
                break;
            }
            None => {
                debug!(connection = connection_id, "Stream ended");
                break;
            }
        };

        if text.len() > MAX_FRAME_SIZE {
            warn!(
                connection = connection_id,
                size = text.len(),
                "Frame exceeds max size ({} > {}), dropping",
                text.len(),
                MAX_FRAME_SIZE
            );
            continue;
        }

        match router.handle_inbound(&**transport, &text).await {
            Disposition::Continue => {}
            Disposition::Close(reason) => {
                debug!(connection = connection_id, %reason, "Router closed connection");
                break;
            }
        }
    }
}
