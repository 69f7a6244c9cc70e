//! Connection gateway: identity assignment, inbound dispatch, outbound delivery.
//!
//! The gateway knows nothing about sockets. Each connection registers an
//! outbox on connect and gets an opaque [`ConnectionId`]; inbound events are
//! routed to the [`SessionRegistry`] and resolved through its membership index,
//! so there is no per-connection handler state to register or tear down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::{ClientEvent, ErrorKind, ProtocolError, ServerEvent};
use crate::registry::{SessionError, SessionRegistry};
use crate::session::{ConnectionId, Outbox};

/// Gateway statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub rejected_events: u64,
}

#[derive(Default)]
struct AtomicGatewayStats {
    total_connections: AtomicU64,
    total_events: AtomicU64,
    rejected_events: AtomicU64,
}

pub struct Gateway {
    registry: Arc<SessionRegistry>,
    connections: RwLock<HashMap<ConnectionId, Outbox>>,
    stats: AtomicGatewayStats,
}

impl Gateway {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            connections: RwLock::new(HashMap::new()),
            stats: AtomicGatewayStats::default(),
        }
    }

    /// Register a new connection and hand back its identity.
    pub async fn on_connect(&self, outbox: Outbox) -> ConnectionId {
        let conn = ConnectionId::new();
        self.connections.write().await.insert(conn, outbox);
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        log::debug!("Connection {conn} registered");
        conn
    }

    /// Forget the connection and run session cleanup. Safe to call for
    /// connections that never joined, and safe to call more than once.
    pub async fn on_disconnect(&self, conn: &ConnectionId) {
        self.connections.write().await.remove(conn);
        self.registry.disconnect(conn).await;
        log::debug!("Connection {conn} unregistered");
    }

    /// Route one decoded client event. Rejections are logged, answered with
    /// an `error` event, and returned to the caller; they never affect other
    /// connections.
    pub async fn dispatch(&self, conn: &ConnectionId, event: ClientEvent) -> Result<(), SessionError> {
        self.stats.total_events.fetch_add(1, Ordering::Relaxed);
        log::debug!("{conn} -> {}", event.name());

        let result = match event {
            ClientEvent::JoinCodeBlock { session_id } => match self.outbox(conn).await {
                Some(outbox) => self
                    .registry
                    .join(&session_id, *conn, outbox)
                    .await
                    .map(|_| ()),
                None => Err(SessionError::OrphanEvent(*conn)),
            },
            ClientEvent::CodeChange { code } => {
                self.registry.code_change(conn, code).await.map(|_| ())
            }
            ClientEvent::SolutionMatched => {
                self.registry.solution_matched_by(conn).await.map(|_| ())
            }
            ClientEvent::LeaveCodeBlock => self.registry.leave(conn).await.map(|_| ()),
        };

        if let Err(ref e) = result {
            self.stats.rejected_events.fetch_add(1, Ordering::Relaxed);
            log::warn!("Rejected event from {conn}: {e}");
            self.unicast(conn, ServerEvent::error(e.kind(), e.to_string()))
                .await;
        }
        result
    }

    /// Decode a text frame and dispatch it.
    pub async fn dispatch_text(&self, conn: &ConnectionId, text: &str) -> Result<(), GatewayError> {
        match ClientEvent::decode(text) {
            Ok(event) => Ok(self.dispatch(conn, event).await?),
            Err(e) => {
                self.stats.rejected_events.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to decode frame from {conn}: {e}");
                self.unicast(conn, ServerEvent::error(ErrorKind::Malformed, e.to_string()))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Deliver to a single connection. Returns false if it is gone.
    pub async fn unicast(&self, conn: &ConnectionId, event: ServerEvent) -> bool {
        match self.outbox(conn).await {
            Some(outbox) => outbox.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver to every member of a session, originator included.
    pub async fn broadcast(&self, session_id: &str, event: ServerEvent) -> Result<usize, SessionError> {
        self.registry.broadcast(session_id, event).await
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn stats(&self) -> GatewayStats {
        GatewayStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.connections.read().await.len() as u64,
            total_events: self.stats.total_events.load(Ordering::Relaxed),
            rejected_events: self.stats.rejected_events.load(Ordering::Relaxed),
        }
    }

    async fn outbox(&self, conn: &ConnectionId) -> Option<Outbox> {
        self.connections.read().await.get(conn).cloned()
    }
}

/// Either half of a rejected inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
