//! Socket abstraction under the connection manager.
//!
//! A [`Transport`] opens one socket and hands back a [`Link`]: a sender for
//! outgoing text frames and a receiver of [`SocketEvent`]s. Dropping the
//! outgoing sender closes the socket.
//!
//! [`WebSocketTransport`] is the tokio-tungstenite implementation:
//!
//! ```text
//!  Link.outgoing ──► writer task ──► ws sink
//!  Link.incoming ◄── reader task ◄── ws stream
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// What a socket reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One inbound text frame, undecoded.
    Frame(String),
    /// The peer closed the socket.
    Closed,
    /// The socket failed.
    Error(String),
}

/// The two halves of an open socket.
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
}

/// Opens sockets to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_owned(),
                reason: e.to_string(),
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();

        // Writer task: forward outgoing channel to the socket, close when
        // the owner drops its sender.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(WsMessage::Text(text.into())).await {
                    log::debug!("WebSocket write failed: {e}");
                    return;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: report frames until the socket ends. Exactly one
        // Closed or Error is sent last.
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                let event = match frame {
                    Ok(WsMessage::Text(text)) => SocketEvent::Frame(text.to_string()),
                    Ok(WsMessage::Binary(data)) => {
                        SocketEvent::Frame(String::from_utf8_lossy(&data).into_owned())
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(SocketEvent::Error(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    return; // Owner went away
                }
            }
            let _ = in_tx.send(SocketEvent::Closed);
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
