//! Connection → session routing table.
//!
//! One entry per joined connection. `claim` and `release` are the only
//! mutations and each is a single atomic step under the write lock, so a
//! connection can neither join two sessions nor be removed from one twice.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::session::ConnectionId;

#[derive(Default)]
pub struct MembershipIndex {
    entries: RwLock<HashMap<ConnectionId, String>>,
}

impl MembershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `conn -> session_id`. Returns the session the connection already
    /// belongs to if there is one, leaving the index untouched.
    pub async fn claim(&self, conn: ConnectionId, session_id: &str) -> Result<(), String> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&conn) {
            return Err(existing.clone());
        }
        entries.insert(conn, session_id.to_string());
        Ok(())
    }

    /// Remove the entry. Only the first caller for a given membership gets
    /// `Some`; every later call is a no-op returning `None`.
    pub async fn release(&self, conn: &ConnectionId) -> Option<String> {
        self.entries.write().await.remove(conn)
    }

    pub async fn session_of(&self, conn: &ConnectionId) -> Option<String> {
        self.entries.read().await.get(conn).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
