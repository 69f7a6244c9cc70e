//! # codeblock-collab — Real-time exercise rooms for mentors and students
//!
//! Tracks who is connected to which exercise session, assigns the mentor and
//! student roles, propagates whole-text code edits, keeps the student count
//! and tears down abandoned sessions. Session state is ephemeral and
//! in-memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   JSON events   ┌──────────────┐
//! │ CodeBlockClient│ ◄─────────────► │ CollabServer │  (WebSocket transport)
//! │ (per user)     │                 └──────┬───────┘
//! └────────────────┘                        │
//!                                    ┌──────┴───────┐
//!                                    │   Gateway    │  identity, dispatch,
//!                                    └──────┬───────┘  unicast/broadcast
//!                                           │
//!                                  ┌────────┴────────┐
//!                                  │ SessionRegistry │──── MembershipIndex
//!                                  └────────┬────────┘
//!                                           │
//!                                    Session (mutex each)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON event envelope and event types
//! - [`session`] — single-room state machine
//! - [`membership`] — connection → session routing table
//! - [`registry`] — session lifetime, role assignment, cleanup
//! - [`gateway`] — transport-agnostic dispatch and delivery
//! - [`server`] — WebSocket server
//! - [`client`] — WebSocket client

pub mod protocol;
pub mod session;
pub mod membership;
pub mod registry;
pub mod gateway;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{ClientEvent, ErrorKind, ProtocolError, Role, ServerEvent};
pub use session::{ConnectionId, Departure, Outbox, Session, SessionSnapshot};
pub use membership::MembershipIndex;
pub use registry::{RegistryStats, SessionError, SessionRegistry};
pub use gateway::{Gateway, GatewayError, GatewayStats};
pub use server::{CollabServer, ServerConfig};
pub use client::{ClientError, CodeBlockClient, ConnectionState, SessionEvent};
