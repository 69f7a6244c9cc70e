//! Session registry: owner of every live exercise room.
//!
//! ```text
//!   join / codeChange / leave / disconnect
//!                 │
//!                 ▼
//!        ┌──────────────────┐   conn → session id   ┌─────────────────┐
//!        │ SessionRegistry  │ ◄───────────────────► │ MembershipIndex │
//!        └────────┬─────────┘                       └─────────────────┘
//!                 │ session id → Arc<Mutex<Session>>
//!        ┌────────┼────────┐
//!        ▼        ▼        ▼
//!     Session  Session  Session     (one mutex each, fan-out to members)
//! ```
//!
//! Locking rules:
//! - The map lock is never held while waiting on a session mutex.
//! - A session is removed from the map only while its own mutex is held, and
//!   is marked closed first. A join that raced with the teardown sees the
//!   closed flag and retries against a fresh session.
//! - Membership entries are claimed before a connection is admitted and
//!   released before it is removed, which makes disconnect at-most-once.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::membership::MembershipIndex;
use crate::protocol::{ErrorKind, Role, ServerEvent};
use crate::session::{ConnectionId, Departure, Outbox, Session, SessionSnapshot};

/// Rejections of session-level events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Connection {conn} already belongs to session {session_id}")]
    DuplicateJoin {
        conn: ConnectionId,
        session_id: String,
    },
    #[error("Connection {0} is not a member of any session")]
    OrphanEvent(ConnectionId),
    #[error("Session not found: {0}")]
    UnknownSession(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::DuplicateJoin { .. } => ErrorKind::DuplicateJoin,
            SessionError::OrphanEvent(_) => ErrorKind::OrphanEvent,
            SessionError::UnknownSession(_) => ErrorKind::UnknownSession,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub joined_connections: usize,
}

type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    membership: MembershipIndex,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `conn` to `session_id`, creating the session on first use.
    ///
    /// The joiner receives `role`, then the current `codeUpdate` and
    /// `studentsCountUpdate`; afterwards the updated count is broadcast to the
    /// whole session, joiner included.
    pub async fn join(
        &self,
        session_id: &str,
        conn: ConnectionId,
        outbox: Outbox,
    ) -> Result<Role, SessionError> {
        if let Err(existing) = self.membership.claim(conn, session_id).await {
            return Err(SessionError::DuplicateJoin {
                conn,
                session_id: existing,
            });
        }

        loop {
            let handle = self.get_or_create(session_id).await;
            let mut session = handle.lock().await;
            if session.is_closed() {
                // Torn down between lookup and lock; the map no longer holds it.
                continue;
            }

            let role = session.admit(conn, outbox.clone());
            session.unicast(&conn, ServerEvent::Role(role));
            session.unicast(&conn, ServerEvent::CodeUpdate(session.current_code().to_string()));
            let count = session.student_count();
            session.unicast(&conn, ServerEvent::StudentsCountUpdate(count));
            session.broadcast(&ServerEvent::StudentsCountUpdate(count));

            match role {
                Role::Mentor => log::info!("Mentor assigned to session {session_id}: {conn}"),
                Role::Student => log::info!(
                    "Student {conn} joined session {session_id} ({count} students)"
                ),
            }
            return Ok(role);
        }
    }

    /// Replace the session's code and broadcast it to every member, sender
    /// included. Returns the number of members reached.
    pub async fn code_change(&self, conn: &ConnectionId, code: String) -> Result<usize, SessionError> {
        let session_id = self
            .membership
            .session_of(conn)
            .await
            .ok_or(SessionError::OrphanEvent(*conn))?;
        let handle = self
            .handle(&session_id)
            .await
            .ok_or_else(|| SessionError::UnknownSession(session_id.clone()))?;

        let mut session = handle.lock().await;
        if session.is_closed() || !session.is_member(conn) {
            return Err(SessionError::OrphanEvent(*conn));
        }
        session.set_code(code.clone());
        let delivered = session.broadcast(&ServerEvent::CodeUpdate(code));
        log::debug!("Code update in session {session_id} from {conn} ({delivered} recipients)");
        Ok(delivered)
    }

    /// Rebroadcast a client's claim that the solution was matched. No state
    /// changes and nothing is verified.
    pub async fn solution_matched(&self, session_id: &str) -> Result<usize, SessionError> {
        let delivered = self.broadcast(session_id, ServerEvent::SolutionMatched).await?;
        log::info!("Solution matched in session {session_id}");
        Ok(delivered)
    }

    /// `solution_matched` for the session `conn` currently belongs to.
    pub async fn solution_matched_by(&self, conn: &ConnectionId) -> Result<usize, SessionError> {
        let session_id = self
            .membership
            .session_of(conn)
            .await
            .ok_or(SessionError::OrphanEvent(*conn))?;
        self.solution_matched(&session_id).await
    }

    /// Deliver `event` to every member of `session_id`.
    pub async fn broadcast(&self, session_id: &str, event: ServerEvent) -> Result<usize, SessionError> {
        let handle = self
            .handle(session_id)
            .await
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        let session = handle.lock().await;
        if session.is_closed() {
            return Err(SessionError::UnknownSession(session_id.to_string()));
        }
        Ok(session.broadcast(&event))
    }

    /// Explicit leave. The connection stays open and may join again.
    pub async fn leave(&self, conn: &ConnectionId) -> Result<Departure, SessionError> {
        self.remove_member(conn)
            .await
            .ok_or(SessionError::OrphanEvent(*conn))
    }

    /// Connection closed. A no-op for connections that never joined or have
    /// already left.
    pub async fn disconnect(&self, conn: &ConnectionId) -> Option<Departure> {
        self.remove_member(conn).await
    }

    async fn remove_member(&self, conn: &ConnectionId) -> Option<Departure> {
        // Releasing first makes every later disconnect/leave for this
        // membership fall through here.
        let session_id = self.membership.release(conn).await?;

        let Some(handle) = self.handle(&session_id).await else {
            log::warn!("Connection {conn} was routed to missing session {session_id}");
            return None;
        };

        let mut session = handle.lock().await;
        let Some(departure) = session.depart(conn) else {
            log::warn!("Connection {conn} was routed to session {session_id} but not a member");
            return None;
        };

        match departure {
            Departure::Mentor => {
                session.broadcast(&ServerEvent::MentorLeft);
                log::info!("Mentor left session {session_id}: {conn}");
            }
            Departure::Student { remaining } => {
                session.broadcast(&ServerEvent::StudentsCountUpdate(remaining));
                log::info!("Student left session {session_id}: {conn} ({remaining} students)");
            }
        }

        if session.is_abandoned() {
            session.close();
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(&session_id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                sessions.remove(&session_id);
            }
            log::info!("Cleaned up state for session {session_id}");
        }

        Some(departure)
    }

    /// Session the connection currently belongs to.
    pub async fn session_of(&self, conn: &ConnectionId) -> Option<String> {
        self.membership.session_of(conn).await
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        (!session.is_closed()).then(|| session.snapshot())
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.session_count().await,
            joined_connections: self.membership.len().await,
        }
    }

    async fn handle(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        // Fast path: read lock
        if let Some(handle) = self.handle(session_id).await {
            return handle;
        }

        // Slow path: write lock, double-checked
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                log::info!("Created session {session_id}");
                Arc::new(Mutex::new(Session::new(session_id)))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Peer {
        id: ConnectionId,
        outbox: Outbox,
        rx: UnboundedReceiver<ServerEvent>,
    }

    impl Peer {
        fn new() -> Self {
            let (outbox, rx) = mpsc::unbounded_channel();
            Self {
                id: ConnectionId::new(),
                outbox,
                rx,
            }
        }

        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    async fn join(registry: &SessionRegistry, session_id: &str, peer: &Peer) -> Result<Role, SessionError> {
        registry.join(session_id, peer.id, peer.outbox.clone()).await
    }

    #[tokio::test]
    async fn test_scenario_mentor_then_student() {
        let registry = SessionRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();

        assert_eq!(join(&registry, "r1", &a).await.unwrap(), Role::Mentor);
        assert_eq!(
            a.drain(),
            vec![
                ServerEvent::Role(Role::Mentor),
                ServerEvent::CodeUpdate(String::new()),
                ServerEvent::StudentsCountUpdate(0),
                ServerEvent::StudentsCountUpdate(0),
            ]
        );

        assert_eq!(join(&registry, "r1", &b).await.unwrap(), Role::Student);
        assert_eq!(
            b.drain(),
            vec![
                ServerEvent::Role(Role::Student),
                ServerEvent::CodeUpdate(String::new()),
                ServerEvent::StudentsCountUpdate(1),
                ServerEvent::StudentsCountUpdate(1),
            ]
        );
        assert_eq!(a.drain(), vec![ServerEvent::StudentsCountUpdate(1)]);
    }

    #[tokio::test]
    async fn test_scenario_full_lifecycle() {
        let registry = SessionRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        join(&registry, "r1", &a).await.unwrap();
        join(&registry, "r1", &b).await.unwrap();
        a.drain();
        b.drain();

        // Code change reaches sender and peer
        let delivered = registry.code_change(&a.id, "let x=1".to_string()).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(a.drain(), vec![ServerEvent::CodeUpdate("let x=1".into())]);
        assert_eq!(b.drain(), vec![ServerEvent::CodeUpdate("let x=1".into())]);

        // Mentor leaves: student notified, session survives
        assert_eq!(registry.disconnect(&a.id).await, Some(Departure::Mentor));
        assert_eq!(b.drain(), vec![ServerEvent::MentorLeft]);
        let snap = registry.snapshot("r1").await.unwrap();
        assert_eq!(snap.student_count, 1);
        assert!(snap.mentor_id.is_none());
        assert_eq!(snap.current_code, "let x=1");

        // Last student leaves: session collected
        assert_eq!(
            registry.disconnect(&b.id).await,
            Some(Departure::Student { remaining: 0 })
        );
        assert!(!registry.contains("r1").await);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let registry = SessionRegistry::new();
        let a = Peer::new();
        join(&registry, "r1", &a).await.unwrap();

        assert_eq!(registry.disconnect(&a.id).await, Some(Departure::Mentor));
        assert_eq!(registry.disconnect(&a.id).await, None);
        assert_eq!(registry.disconnect(&a.id).await, None);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_never_joined() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.disconnect(&ConnectionId::new()).await, None);
    }

    #[tokio::test]
    async fn test_solution_matched_broadcasts_without_state_change() {
        let registry = SessionRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        join(&registry, "r1", &a).await.unwrap();
        join(&registry, "r1", &b).await.unwrap();
        registry.code_change(&b.id, "x".to_string()).await.unwrap();
        let before = registry.snapshot("r1").await.unwrap();
        a.drain();
        b.drain();

        assert_eq!(registry.solution_matched("r1").await.unwrap(), 2);
        assert_eq!(a.drain(), vec![ServerEvent::SolutionMatched]);
        assert_eq!(b.drain(), vec![ServerEvent::SolutionMatched]);
        assert_eq!(registry.snapshot("r1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_solution_matched_unknown_session() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.solution_matched("nope").await,
            Err(SessionError::UnknownSession("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let registry = SessionRegistry::new();
        let mut a = Peer::new();
        join(&registry, "r1", &a).await.unwrap();
        a.drain();

        let err = join(&registry, "r2", &a).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::DuplicateJoin {
                conn: a.id,
                session_id: "r1".to_string()
            }
        );
        assert_eq!(err.kind(), ErrorKind::DuplicateJoin);
        // No role, no session created, original membership intact
        assert!(a.drain().is_empty());
        assert!(!registry.contains("r2").await);
        assert_eq!(registry.session_of(&a.id).await.as_deref(), Some("r1"));

        let err = join(&registry, "r1", &a).await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateJoin { .. }));
        assert_eq!(registry.snapshot("r1").await.unwrap().member_count, 1);
    }

    #[tokio::test]
    async fn test_orphan_code_change_rejected() {
        let registry = SessionRegistry::new();
        let stranger = ConnectionId::new();
        assert_eq!(
            registry.code_change(&stranger, "x".to_string()).await,
            Err(SessionError::OrphanEvent(stranger))
        );
        assert_eq!(
            registry.solution_matched_by(&stranger).await,
            Err(SessionError::OrphanEvent(stranger))
        );
        assert_eq!(
            registry.leave(&stranger).await,
            Err(SessionError::OrphanEvent(stranger))
        );
    }

    #[tokio::test]
    async fn test_rejoin_after_teardown_starts_fresh() {
        let registry = SessionRegistry::new();
        let a = Peer::new();
        join(&registry, "r1", &a).await.unwrap();
        registry.code_change(&a.id, "old code".to_string()).await.unwrap();
        registry.disconnect(&a.id).await;
        assert!(!registry.contains("r1").await);

        let mut c = Peer::new();
        assert_eq!(join(&registry, "r1", &c).await.unwrap(), Role::Mentor);
        let events = c.drain();
        assert_eq!(events[1], ServerEvent::CodeUpdate(String::new()));
        let snap = registry.snapshot("r1").await.unwrap();
        assert_eq!(snap.student_count, 0);
        assert_eq!(snap.mentor_id, Some(c.id));
        assert_eq!(snap.current_code, "");
    }

    #[tokio::test]
    async fn test_leave_then_join_elsewhere() {
        let registry = SessionRegistry::new();
        let mut a = Peer::new();
        let b = Peer::new();
        join(&registry, "r1", &b).await.unwrap();
        join(&registry, "r1", &a).await.unwrap();

        assert_eq!(
            registry.leave(&a.id).await,
            Ok(Departure::Student { remaining: 0 })
        );
        assert!(registry.session_of(&a.id).await.is_none());
        a.drain();

        assert_eq!(join(&registry, "r2", &a).await.unwrap(), Role::Mentor);
        assert_eq!(registry.session_count().await, 2);
        // Disconnect after an explicit leave only affects the new session
        registry.disconnect(&a.id).await;
        assert!(!registry.contains("r2").await);
        assert!(registry.contains("r1").await);
    }

    #[tokio::test]
    async fn test_mentor_slot_refilled_by_next_joiner() {
        let registry = SessionRegistry::new();
        let a = Peer::new();
        let b = Peer::new();
        let c = Peer::new();
        join(&registry, "r1", &a).await.unwrap();
        join(&registry, "r1", &b).await.unwrap();
        registry.disconnect(&a.id).await;

        assert_eq!(join(&registry, "r1", &c).await.unwrap(), Role::Mentor);
        let snap = registry.snapshot("r1").await.unwrap();
        assert_eq!(snap.mentor_id, Some(c.id));
        assert_eq!(snap.student_count, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        join(&registry, "r1", &a).await.unwrap();
        join(&registry, "r2", &b).await.unwrap();
        a.drain();
        b.drain();

        registry.code_change(&a.id, "only r1".to_string()).await.unwrap();
        assert_eq!(a.drain().len(), 1);
        assert!(b.drain().is_empty());
        assert_eq!(registry.snapshot("r2").await.unwrap().current_code, "");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_single_mentor() {
        let registry = Arc::new(SessionRegistry::new());

        for round in 0..20 {
            let session_id = format!("race-{round}");
            let mut handles = Vec::new();
            for _ in 0..16 {
                let registry = registry.clone();
                let session_id = session_id.clone();
                handles.push(tokio::spawn(async move {
                    let (outbox, _rx) = mpsc::unbounded_channel();
                    registry.join(&session_id, ConnectionId::new(), outbox).await
                }));
            }

            let mut mentors = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap() == Role::Mentor {
                    mentors += 1;
                }
            }
            assert_eq!(mentors, 1, "round {round}");
            let snap = registry.snapshot(&session_id).await.unwrap();
            assert_eq!(snap.student_count, 15);
            assert_eq!(snap.member_count, 16);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_leaves_no_state() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();

        for i in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let session_id = format!("room-{}", i % 4);
                let conn = ConnectionId::new();
                let (outbox, _rx) = mpsc::unbounded_channel();
                registry.join(&session_id, conn, outbox).await.unwrap();
                registry
                    .code_change(&conn, format!("edit {i}"))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                assert!(registry.disconnect(&conn).await.is_some());
                assert!(registry.disconnect(&conn).await.is_none());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            registry.stats().await,
            RegistryStats {
                active_sessions: 0,
                joined_connections: 0
            }
        );
    }

    #[tokio::test]
    async fn test_mentor_is_always_a_member() {
        let registry = SessionRegistry::new();
        let peers: Vec<Peer> = (0..5).map(|_| Peer::new()).collect();
        for peer in &peers {
            join(&registry, "r1", peer).await.unwrap();
        }

        for peer in &peers {
            registry.disconnect(&peer.id).await;
            if let Some(snap) = registry.snapshot("r1").await {
                if let Some(mentor) = snap.mentor_id {
                    assert_eq!(registry.session_of(&mentor).await.as_deref(), Some("r1"));
                }
            }
        }
        assert!(!registry.contains("r1").await);
    }
}
