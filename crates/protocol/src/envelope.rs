use crate::Payload;
use models::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire names of every message in the closed set, in contract order.
pub const MESSAGE_TYPES: &[&str] = &[
    "QT_POSITION_CHANGED",
    "QT_SIZE_CHANGED",
    "QT_CREATED",
    "QT_MINIMIZED",
    "QT_RESTORED",
    "QT_CLOSED",
    "MANAGER_CLOSE_ALL",
    "MANAGER_CLOSE_MINIMIZED",
    "MANAGER_STATE_CHANGED",
    "REQUEST_FULL_STATE",
    "CONTENT_SCRIPT_READY",
    "CONTENT_SCRIPT_UNLOAD",
    "QT_STATE_SYNC",
    "SIDEBAR_UPDATE",
];

/// Every message on the wire: a typed payload threaded with a correlation
/// id and the sender's wall clock. Messages are values; they never mutate
/// state directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Payload,
    pub correlation_id: String,
    pub timestamp: Timestamp,
}

impl Envelope {
    /// Wrap a payload with a fresh correlation id.
    pub fn new(payload: Payload, timestamp: Timestamp) -> Self {
        Self {
            payload,
            correlation_id: new_correlation_id(),
            timestamp,
        }
    }

    /// Wrap a payload reusing an existing correlation id, threading one
    /// request through store writes and fan-out.
    pub fn correlated(payload: Payload, correlation_id: String, timestamp: Timestamp) -> Self {
        Self {
            payload,
            correlation_id,
            timestamp,
        }
    }
}

/// Opaque unique token threading a request through router, store, and
/// broadcast.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Why an inbound value was rejected before dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid message: {}", details.join("; "))]
pub struct InvalidMessage {
    pub details: Vec<String>,
}

/// Validate an inbound value against the contract, reporting every problem
/// found rather than the first.
pub fn parse_envelope(value: &Value) -> Result<Envelope, InvalidMessage> {
    let mut details = Vec::new();

    match value.get("type").and_then(Value::as_str) {
        Some(name) if MESSAGE_TYPES.contains(&name) => {}
        Some(name) => details.push(format!("unknown message type '{name}'")),
        None => details.push("missing message type".to_string()),
    }
    match value.get("correlationId").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => {}
        Some(_) => details.push("correlationId must not be empty".to_string()),
        None => details.push("missing correlationId".to_string()),
    }
    if !value.get("timestamp").map_or(false, Value::is_number) {
        details.push("timestamp must be numeric".to_string());
    }
    if !details.is_empty() {
        return Err(InvalidMessage { details });
    }

    serde_json::from_value(value.clone()).map_err(|err| InvalidMessage {
        details: vec![err.to_string()],
    })
}
