//! JSON event protocol spoken over the WebSocket.
//!
//! Wire format (one UTF-8 text frame per event):
//! ```text
//! { "event": "<name>", "data": <payload> }
//! ```
//!
//! `data` is omitted (or `null`) for events without a payload. Event names
//! are camelCase and shared by every client of the exercise room:
//!
//! | Event                 | Payload              | Direction        |
//! |-----------------------|----------------------|------------------|
//! | `joinCodeBlock`       | session id (string)  | client → server  |
//! | `codeChange`          | full code (string)   | client → server  |
//! | `leaveCodeBlock`      | —                    | client → server  |
//! | `solutionMatched`     | — (ignored if sent)  | both             |
//! | `role`                | `"mentor"`/`"student"` | server → client |
//! | `codeUpdate`          | full code (string)   | server → client  |
//! | `studentsCountUpdate` | integer ≥ 0          | server → client  |
//! | `mentorLeft`          | —                    | server → client  |
//! | `error`               | `{kind, message}`    | server → client  |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JOIN_CODE_BLOCK: &str = "joinCodeBlock";
pub const CODE_CHANGE: &str = "codeChange";
pub const LEAVE_CODE_BLOCK: &str = "leaveCodeBlock";
pub const SOLUTION_MATCHED: &str = "solutionMatched";
pub const ROLE: &str = "role";
pub const CODE_UPDATE: &str = "codeUpdate";
pub const STUDENTS_COUNT_UPDATE: &str = "studentsCountUpdate";
pub const MENTOR_LEFT: &str = "mentorLeft";
pub const ERROR: &str = "error";

/// Role handed to a connection when it joins a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mentor,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Mentor => write!(f, "mentor"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// Category of a rejected client event, reported back in an `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DuplicateJoin,
    OrphanEvent,
    UnknownSession,
    Malformed,
}

/// Events sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    JoinCodeBlock { session_id: String },
    CodeChange { code: String },
    /// Client-asserted; the server does not verify the claim.
    SolutionMatched,
    LeaveCodeBlock,
}

/// Events sent by the server, either to one connection or to a whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Role(Role),
    CodeUpdate(String),
    StudentsCountUpdate(usize),
    SolutionMatched,
    MentorLeft,
    Error { kind: ErrorKind, message: String },
}

/// Raw envelope shared by both directions.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorPayload {
    kind: ErrorKind,
    message: String,
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Invalid payload for '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ClientEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinCodeBlock { .. } => JOIN_CODE_BLOCK,
            ClientEvent::CodeChange { .. } => CODE_CHANGE,
            ClientEvent::SolutionMatched => SOLUTION_MATCHED,
            ClientEvent::LeaveCodeBlock => LEAVE_CODE_BLOCK,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            ClientEvent::JoinCodeBlock { session_id } => Value::String(session_id.clone()),
            ClientEvent::CodeChange { code } => Value::String(code.clone()),
            ClientEvent::SolutionMatched | ClientEvent::LeaveCodeBlock => Value::Null,
        };
        encode_envelope(self.name(), data)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope = decode_envelope(text)?;
        match envelope.event.as_str() {
            JOIN_CODE_BLOCK => Ok(ClientEvent::JoinCodeBlock {
                session_id: payload(JOIN_CODE_BLOCK, envelope.data)?,
            }),
            CODE_CHANGE => Ok(ClientEvent::CodeChange {
                code: payload(CODE_CHANGE, envelope.data)?,
            }),
            // Older clients send the code block id along; routing never uses it.
            SOLUTION_MATCHED => Ok(ClientEvent::SolutionMatched),
            LEAVE_CODE_BLOCK => Ok(ClientEvent::LeaveCodeBlock),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

impl ServerEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Role(_) => ROLE,
            ServerEvent::CodeUpdate(_) => CODE_UPDATE,
            ServerEvent::StudentsCountUpdate(_) => STUDENTS_COUNT_UPDATE,
            ServerEvent::SolutionMatched => SOLUTION_MATCHED,
            ServerEvent::MentorLeft => MENTOR_LEFT,
            ServerEvent::Error { .. } => ERROR,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            ServerEvent::Role(role) => to_value(ROLE, role)?,
            ServerEvent::CodeUpdate(code) => Value::String(code.clone()),
            ServerEvent::StudentsCountUpdate(count) => Value::from(*count),
            ServerEvent::SolutionMatched | ServerEvent::MentorLeft => Value::Null,
            ServerEvent::Error { kind, message } => to_value(
                ERROR,
                &ErrorPayload {
                    kind: *kind,
                    message: message.clone(),
                },
            )?,
        };
        encode_envelope(self.name(), data)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope = decode_envelope(text)?;
        match envelope.event.as_str() {
            ROLE => Ok(ServerEvent::Role(payload(ROLE, envelope.data)?)),
            CODE_UPDATE => Ok(ServerEvent::CodeUpdate(payload(CODE_UPDATE, envelope.data)?)),
            STUDENTS_COUNT_UPDATE => Ok(ServerEvent::StudentsCountUpdate(payload(
                STUDENTS_COUNT_UPDATE,
                envelope.data,
            )?)),
            SOLUTION_MATCHED => Ok(ServerEvent::SolutionMatched),
            MENTOR_LEFT => Ok(ServerEvent::MentorLeft),
            ERROR => {
                let ErrorPayload { kind, message } = payload(ERROR, envelope.data)?;
                Ok(ServerEvent::Error { kind, message })
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

fn encode_envelope(event: &str, data: Value) -> Result<String, ProtocolError> {
    serde_json::to_string(&Envelope {
        event: event.to_string(),
        data,
    })
    .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

fn to_value<T: Serialize>(event: &str, value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_join() {
        let event = ClientEvent::decode(r#"{"event":"joinCodeBlock","data":"r1"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinCodeBlock {
                session_id: "r1".to_string()
            }
        );
    }

    #[test]
    fn test_decode_code_change_preserves_text() {
        let frame = r#"{"event":"codeChange","data":"let x = \"1\";\n"}"#;
        let event = ClientEvent::decode(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::CodeChange {
                code: "let x = \"1\";\n".to_string()
            }
        );
    }

    #[test]
    fn test_solution_matched_ignores_payload() {
        let with_id =
            ClientEvent::decode(r#"{"event":"solutionMatched","data":"65f0c0ffee"}"#).unwrap();
        let bare = ClientEvent::decode(r#"{"event":"solutionMatched"}"#).unwrap();
        assert_eq!(with_id, ClientEvent::SolutionMatched);
        assert_eq!(bare, ClientEvent::SolutionMatched);
    }

    #[test]
    fn test_unit_events_omit_data() {
        assert_eq!(
            ServerEvent::MentorLeft.encode().unwrap(),
            r#"{"event":"mentorLeft"}"#
        );
        assert_eq!(
            ClientEvent::LeaveCodeBlock.encode().unwrap(),
            r#"{"event":"leaveCodeBlock"}"#
        );
    }

    #[test]
    fn test_server_event_wire_shape() {
        assert_eq!(
            ServerEvent::Role(Role::Mentor).encode().unwrap(),
            r#"{"event":"role","data":"mentor"}"#
        );
        assert_eq!(
            ServerEvent::StudentsCountUpdate(3).encode().unwrap(),
            r#"{"event":"studentsCountUpdate","data":3}"#
        );
        assert_eq!(
            ServerEvent::CodeUpdate(String::new()).encode().unwrap(),
            r#"{"event":"codeUpdate","data":""}"#
        );
    }

    #[test]
    fn test_error_event_roundtrip() {
        let event = ServerEvent::error(ErrorKind::DuplicateJoin, "already joined r1");
        let text = event.encode().unwrap();
        assert!(text.contains(r#""kind":"duplicateJoin""#));
        assert_eq!(ServerEvent::decode(&text).unwrap(), event);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = ClientEvent::decode(r#"{"event":"dropTable","data":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownEvent("dropTable".to_string()));
    }

    #[test]
    fn test_wrong_payload_type_rejected() {
        let err = ClientEvent::decode(r#"{"event":"joinCodeBlock","data":42}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref event, .. } if event == "joinCodeBlock"));

        let err = ClientEvent::decode(r#"{"event":"codeChange"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ClientEvent::decode("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ServerEvent::decode(r#"{"data":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_negative_count_rejected() {
        let err = ServerEvent::decode(r#"{"event":"studentsCountUpdate","data":-1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Mentor.to_string(), "mentor");
        assert_eq!(Role::Student.to_string(), "student");
    }
}
