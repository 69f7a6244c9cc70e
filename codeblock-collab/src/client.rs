//! WebSocket client for joining an exercise room.
//!
//! Provides:
//! - Connection lifecycle (connect, close)
//! - Join / leave, code changes, solution-matched notifications
//! - A channel of decoded server events for the application

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEvent, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// An event pushed by the server
    Server(ServerEvent),
}

/// Client-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub struct CodeBlockClient {
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<Message>,
}

impl CodeBlockClient {
    /// Connect to `url` and spawn the reader and writer tasks.
    ///
    /// The returned receiver yields `Connected` first, then every server
    /// event in arrival order, and `Disconnected` once the socket ends.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<SessionEvent>), ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::channel(256);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(256);
        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        // Writer task: forward outgoing channel to WebSocket
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let _ = event_tx.send(SessionEvent::Connected).await;

        // Reader task: decode incoming frames
        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(SessionEvent::Server(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Discarding undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *reader_state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SessionEvent::Disconnected).await;
        });

        Ok((Self { state, outgoing_tx }, event_rx))
    }

    /// Join an exercise room.
    pub async fn join(&self, session_id: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEvent::JoinCodeBlock {
            session_id: session_id.into(),
        })
        .await
    }

    /// Replace the room's code.
    pub async fn send_code(&self, code: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEvent::CodeChange { code: code.into() }).await
    }

    /// Announce that the current code matches the solution.
    pub async fn solution_matched(&self) -> Result<(), ClientError> {
        self.send(ClientEvent::SolutionMatched).await
    }

    /// Leave the current room without closing the connection.
    pub async fn leave(&self) -> Result<(), ClientError> {
        self.send(ClientEvent::LeaveCodeBlock).await
    }

    /// Send any client event.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        let text = event.encode()?;
        self.send_raw(Message::Text(text.into())).await
    }

    /// Send a raw frame (used to exercise malformed input).
    pub async fn send_raw(&self, msg: Message) -> Result<(), ClientError> {
        self.outgoing_tx
            .send(msg)
            .await
            .map_err(|_| ClientError::Protocol(ProtocolError::ConnectionClosed))
    }

    /// Close the connection gracefully.
    pub async fn close(&self) -> Result<(), ClientError> {
        let result = self.send_raw(Message::Close(None)).await;
        *self.state.write().await = ConnectionState::Disconnected;
        result
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}
