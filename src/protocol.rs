//! Connect3Dp WebSocket message formats.
//!
//! Inbound frames are JSON objects with a `Topic` string and a `Data` object:
//!
//! ```json
//! { "MessageID": "...", "Time": "...", "Topic": "machine/subscribe",
//!   "Data": { "AtAGlanceState": { "Status": "Idle", "Nickname": "My Printer" } } }
//! ```
//!
//! Outbound requests carry an `Action` and a `Data` payload, see
//! [`subscribe_request`] and friends.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const SUBSCRIBE_TOPIC: &str = "machine/subscribe";
pub const UNSUBSCRIBE_ACTION: &str = "machine/unsubscribe";
pub const MARK_AS_IDLE_TOPIC: &str = "machine/markAsIdle";
pub const DETAIL_AT_A_GLANCE: &str = "AtAGlance";

pub const KEY_AT_A_GLANCE_STATE: &str = "AtAGlanceState";
pub const KEY_AT_A_GLANCE_CHANGES: &str = "AtAGlanceChanges";
pub const KEY_FAILURE_REASON: &str = "FailureReason";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message is not a JSON object")]
    NotAnObject,
    #[error("Message has no Topic")]
    MissingTopic,
    #[error("Message on '{0}' has no Data object")]
    MissingData(String),
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },
}

/// Topic of the delta broadcast for one machine.
pub fn state_topic(machine_id: &str) -> String {
    format!("machine/{}/state", machine_id)
}

/// A decoded server frame borrowing from the parsed JSON tree.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub topic: &'a str,
    pub data: &'a Map<String, Value>,
}

impl<'a> Envelope<'a> {
    pub fn parse(message: &'a Value) -> Result<Self, ProtocolError> {
        let root = message.as_object().ok_or(ProtocolError::NotAnObject)?;
        let topic = root
            .get("Topic")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingTopic)?;
        let data = root
            .get("Data")
            .and_then(Value::as_object)
            .ok_or_else(|| ProtocolError::MissingData(topic.to_string()))?;
        Ok(Self { topic, data })
    }

    /// The nested object stored under `key`, if it is an object.
    pub fn object(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.data.get(key).and_then(Value::as_object)
    }

    /// Non-empty `FailureReason` reported by the server, if any.
    pub fn failure_reason(&self) -> Option<&'a str> {
        self.data
            .get(KEY_FAILURE_REASON)
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ClientRequest<T: Serialize> {
    action: &'static str,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubscribeData<'a> {
    #[serde(rename = "MachineID")]
    machine_id: &'a str,
    detail_of_state: &'static str,
}

#[derive(Serialize)]
struct MachineData<'a> {
    #[serde(rename = "MachineID")]
    machine_id: &'a str,
}

fn encode<T: Serialize>(action: &'static str, data: T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&ClientRequest { action, data })?)
}

/// AtAGlance subscription request, sent after every connect.
pub fn subscribe_request(machine_id: &str) -> Result<String, ProtocolError> {
    encode(
        SUBSCRIBE_TOPIC,
        SubscribeData {
            machine_id,
            detail_of_state: DETAIL_AT_A_GLANCE,
        },
    )
}

pub fn unsubscribe_request(machine_id: &str) -> Result<String, ProtocolError> {
    encode(UNSUBSCRIBE_ACTION, MachineData { machine_id })
}

pub fn mark_as_idle_request(machine_id: &str) -> Result<String, ProtocolError> {
    encode(MARK_AS_IDLE_TOPIC, MachineData { machine_id })
}
