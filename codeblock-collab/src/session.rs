//! State machine for a single exercise room.
//!
//! A `Session` holds the mentor slot, the student count, the last accepted
//! code text and the outboxes of its members. It never locks anything itself:
//! the registry wraps each session in its own mutex so that every
//! read-modify-write on one room is linearized while different rooms proceed
//! in parallel.
//!
//! Invariants kept here:
//! - `mentor` is `None` or a key of `members`
//! - `student_count` never underflows (decrements saturate at zero)

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{Role, ServerEvent};

/// Outbound channel of one connection. Unbounded: delivery is fire-and-forget.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Opaque identity of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a departing connection was, and what the room looks like afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The mentor left; the slot is free again.
    Mentor,
    /// A student left; carries the updated count.
    Student { remaining: usize },
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub mentor_id: Option<ConnectionId>,
    pub student_count: usize,
    pub current_code: String,
    pub member_count: usize,
}

pub struct Session {
    id: String,
    mentor: Option<ConnectionId>,
    student_count: usize,
    current_code: String,
    members: HashMap<ConnectionId, Outbox>,
    /// Set once the registry has dropped this session from its map.
    closed: bool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mentor: None,
            student_count: 0,
            current_code: String::new(),
            members: HashMap::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mentor(&self) -> Option<ConnectionId> {
        self.mentor
    }

    pub fn student_count(&self) -> usize {
        self.student_count
    }

    pub fn current_code(&self) -> &str {
        &self.current_code
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, conn: &ConnectionId) -> bool {
        self.members.contains_key(conn)
    }

    /// Add a connection and assign its role.
    ///
    /// First come, first served: the connection takes the mentor slot if it is
    /// free, otherwise it counts as a student. A mentor is never demoted.
    pub fn admit(&mut self, conn: ConnectionId, outbox: Outbox) -> Role {
        let role = if self.mentor.is_none() {
            self.mentor = Some(conn);
            Role::Mentor
        } else {
            self.student_count += 1;
            Role::Student
        };
        self.members.insert(conn, outbox);
        role
    }

    /// Remove a connection. Returns `None` if it was not a member.
    pub fn depart(&mut self, conn: &ConnectionId) -> Option<Departure> {
        self.members.remove(conn)?;

        if self.mentor == Some(*conn) {
            self.mentor = None;
            return Some(Departure::Mentor);
        }

        match self.student_count.checked_sub(1) {
            Some(remaining) => self.student_count = remaining,
            None => log::warn!(
                "Student count underflow in session {} on departure of {conn}; clamped at 0",
                self.id
            ),
        }
        Some(Departure::Student {
            remaining: self.student_count,
        })
    }

    /// Last-writer-wins replacement of the shared code.
    pub fn set_code(&mut self, code: String) {
        self.current_code = code;
    }

    /// No mentor and no students: the registry should drop the room.
    pub fn is_abandoned(&self) -> bool {
        self.mentor.is_none() && self.student_count == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Deliver an event to one member. Returns false if it is not a member or
    /// its outbox is gone.
    pub fn unicast(&self, conn: &ConnectionId, event: ServerEvent) -> bool {
        match self.members.get(conn) {
            Some(outbox) => outbox.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to every member, in the order calls are made.
    /// Returns the number of outboxes that accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (conn, outbox) in &self.members {
            if outbox.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                log::debug!("Outbox of {conn} closed; dropping {}", event.name());
            }
        }
        delivered
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            mentor_id: self.mentor,
            student_count: self.student_count,
            current_code: self.current_code.clone(),
            member_count: self.members.len(),
        }
    }
}
