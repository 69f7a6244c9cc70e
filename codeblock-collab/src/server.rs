//! WebSocket server for exercise rooms.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌── Session "r1" ── members
//!            ├── CollabServer ── Gateway ── SessionRegistry
//! Client B ──┘     (task per          │          └── Session "r2" ── members
//!                  connection)        │
//!                       ▲             ▼
//!                       └──── outbox (mpsc) ◄── unicast / broadcast
//! ```
//!
//! Each connection task multiplexes two sources with `select!`: text frames
//! from the socket (decoded and dispatched through the gateway) and events
//! from its own outbox (encoded and written to the socket). Session state is
//! ephemeral and lives only in the registry.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::gateway::{Gateway, GatewayStats};
use crate::registry::SessionRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4001".to_string(),
        }
    }
}

/// The exercise-room server.
pub struct CollabServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
}

impl CollabServer {
    /// Create a server around an explicitly constructed registry.
    pub fn new(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            gateway: Arc::new(Gateway::new(registry)),
        }
    }

    /// Create with default configuration and a fresh registry.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default(), Arc::new(SessionRegistry::new()))
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Session server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, gateway).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        gateway: Arc<Gateway>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outbox, mut outbox_rx) = mpsc::unbounded_channel();
        let conn = gateway.on_connect(outbox).await;
        log::info!("New client connected: {conn} ({addr})");

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                // Rejections are already answered and logged by the gateway.
                                let _ = gateway.dispatch_text(&conn, text.as_str()).await;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                log::debug!("Ignoring binary frame from {conn}");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed: {conn}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {conn}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    event = outbox_rx.recv() => {
                        match event {
                            Some(event) => {
                                let text = event.encode()?;
                                ws_sender.send(Message::Text(text.into())).await?;
                            }
                            None => break,
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        // Runs on every exit path; the registry makes repeats harmless.
        gateway.on_disconnect(&conn).await;
        result
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.gateway.registry()
    }

    pub async fn stats(&self) -> GatewayStats {
        self.gateway.stats().await
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
