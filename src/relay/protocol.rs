//! JSON wire protocol spoken over the WebSocket.
//!
//! Every frame is a text message of the form:
//!
//! ```text
//! { "event": "<name>", "data": <payload> }
//! ```
//!
//! Client → server events: `join-doc`, `leave-doc`, `send-changes`.
//! Server → client events: `joined`, `left`, `error`, `receive-changes`.
//!
//! Client payloads are decoded leniently: a field of the wrong shape is
//! treated as missing so the session can answer with the event-specific
//! `error` frame instead of dropping the frame.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{Error, Result, ValidationError};

/// Opaque client-owned change payload
pub type Delta = Value;

/// Pre-encoded server frame, shared between all recipients of a broadcast
pub type OutboundFrame = Arc<str>;

/// Identifier of a live connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Validated, non-empty document identifier used as the room key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Validate a possibly-missing identifier
    pub fn parse(raw: Option<&str>) -> std::result::Result<Self, ValidationError> {
        match raw {
            Some(id) if !id.is_empty() => Ok(Self(id.to_string())),
            _ => Err(ValidationError::MissingDocId),
        }
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject absent or null deltas
pub fn require_delta(delta: Option<&Delta>) -> std::result::Result<&Delta, ValidationError> {
    match delta {
        Some(delta) if !delta.is_null() => Ok(delta),
        _ => Err(ValidationError::MissingDelta),
    }
}

#[derive(Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decoded client event
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Subscribe to a document room
    JoinDoc {
        /// Requested document, `None` if absent or not a string
        doc_id: Option<String>,
    },
    /// Unsubscribe from a document room
    LeaveDoc {
        /// Requested document, `None` if absent or not a string
        doc_id: Option<String>,
    },
    /// Relay a delta to the other members of a room
    SendChanges {
        /// Target document, `None` if absent or not a string
        doc_id: Option<String>,
        /// Change payload, `None` if absent or null
        delta: Option<Delta>,
    },
    /// Event name this relay does not handle
    Unknown {
        /// The unrecognised event name
        event: String,
    },
}

fn into_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

impl ClientEvent {
    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("Invalid frame: {}", e)))?;

        let event = match frame.event.as_str() {
            "join-doc" => ClientEvent::JoinDoc {
                doc_id: into_string(frame.data),
            },
            "leave-doc" => ClientEvent::LeaveDoc {
                doc_id: into_string(frame.data),
            },
            "send-changes" => match frame.data {
                Value::Object(mut fields) => ClientEvent::SendChanges {
                    doc_id: fields.remove("docId").and_then(into_string),
                    delta: fields.remove("delta").filter(|d| !d.is_null()),
                },
                _ => ClientEvent::SendChanges {
                    doc_id: None,
                    delta: None,
                },
            },
            _ => ClientEvent::Unknown { event: frame.event },
        };

        Ok(event)
    }

    /// Wire name of this event
    pub fn name(&self) -> &str {
        match self {
            ClientEvent::JoinDoc { .. } => "join-doc",
            ClientEvent::LeaveDoc { .. } => "leave-doc",
            ClientEvent::SendChanges { .. } => "send-changes",
            ClientEvent::Unknown { event } => event,
        }
    }
}

/// Body of an `error` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Client-facing message
    pub message: String,
}

impl ErrorPayload {
    /// Rejected `join-doc`
    pub fn join_failed() -> Self {
        Self {
            message: "Failed to join document".to_string(),
        }
    }

    /// Rejected `leave-doc`
    pub fn leave_failed() -> Self {
        Self {
            message: "Failed to leave document".to_string(),
        }
    }

    /// Rejected `send-changes`
    pub fn send_failed() -> Self {
        Self {
            message: "Failed to send changes".to_string(),
        }
    }
}

/// Server → client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Join acknowledgment
    Joined(String),
    /// Leave acknowledgment
    Left(String),
    /// Validation failure on the client's last event
    Error(ErrorPayload),
    /// Delta relayed from another room member
    ReceiveChanges(Delta),
}

impl ServerEvent {
    /// Acknowledge a join
    pub fn joined(doc_id: &DocId) -> Self {
        ServerEvent::Joined(format!("Successfully joined doc: {}", doc_id))
    }

    /// Acknowledge a leave
    pub fn left(doc_id: &DocId) -> Self {
        ServerEvent::Left(format!("Successfully left doc: {}", doc_id))
    }

    /// Encode as a shareable text frame
    pub fn encode(&self) -> Result<OutboundFrame> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }

    /// Decode a server frame (used by clients and tests)
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join() {
        let event = ClientEvent::decode(r#"{"event":"join-doc","data":"doc1"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinDoc {
                doc_id: Some("doc1".to_string())
            }
        );
    }

    #[test]
    fn test_decode_join_without_data() {
        let event = ClientEvent::decode(r#"{"event":"join-doc"}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinDoc { doc_id: None });

        let event = ClientEvent::decode(r#"{"event":"join-doc","data":42}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinDoc { doc_id: None });
    }

    #[test]
    fn test_decode_send_changes() {
        let text = json!({
            "event": "send-changes",
            "data": { "docId": "doc1", "delta": { "ops": [{ "insert": "x" }] } }
        })
        .to_string();

        match ClientEvent::decode(&text).unwrap() {
            ClientEvent::SendChanges { doc_id, delta } => {
                assert_eq!(doc_id.as_deref(), Some("doc1"));
                assert_eq!(delta, Some(json!({ "ops": [{ "insert": "x" }] })));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_send_changes_null_delta_is_missing() {
        let text = r#"{"event":"send-changes","data":{"docId":"doc1","delta":null}}"#;
        match ClientEvent::decode(text).unwrap() {
            ClientEvent::SendChanges { delta, .. } => assert!(delta.is_none()),
            other => panic!("unexpected event {:?}", other),
        }

        let text = r#"{"event":"send-changes","data":"garbage"}"#;
        assert_eq!(
            ClientEvent::decode(text).unwrap(),
            ClientEvent::SendChanges {
                doc_id: None,
                delta: None
            }
        );
    }

    #[test]
    fn test_decode_unknown_and_invalid() {
        let event = ClientEvent::decode(r#"{"event":"cursor-move","data":{}}"#).unwrap();
        assert_eq!(event.name(), "cursor-move");

        let err = ClientEvent::decode("not json").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let doc = DocId::parse(Some("doc1")).unwrap();
        let frame = ServerEvent::joined(&doc).encode().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&frame).unwrap(),
            json!({ "event": "joined", "data": "Successfully joined doc: doc1" })
        );

        let frame = ServerEvent::Error(ErrorPayload::join_failed()).encode().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&frame).unwrap(),
            json!({ "event": "error", "data": { "message": "Failed to join document" } })
        );

        let frame = ServerEvent::ReceiveChanges(json!("x")).encode().unwrap();
        assert_eq!(
            ServerEvent::decode(&frame).unwrap(),
            ServerEvent::ReceiveChanges(json!("x"))
        );
    }

    #[test]
    fn test_doc_id_and_delta_presence() {
        assert_eq!(DocId::parse(None), Err(ValidationError::MissingDocId));
        assert_eq!(DocId::parse(Some("")), Err(ValidationError::MissingDocId));
        assert_eq!(DocId::parse(Some("d")).unwrap().as_str(), "d");

        assert_eq!(require_delta(None), Err(ValidationError::MissingDelta));
        assert_eq!(require_delta(Some(&Value::Null)), Err(ValidationError::MissingDelta));
        assert!(require_delta(Some(&json!(""))).is_ok());
        assert!(require_delta(Some(&json!(0))).is_ok());
    }
}
