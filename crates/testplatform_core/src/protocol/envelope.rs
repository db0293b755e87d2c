//! The wire message envelope.
//!
//! Every frame on a connection carries one JSON envelope: `{"MessageType": ..., "Version": ..., "Payload": ...}`.
//! `Version` is omitted for unversioned (version 0) messages. The payload stays an untyped [`Value`] until a
//! consumer asks for a concrete type with [`Message::payload_as`], so relays can forward envelopes without knowing
//! every payload shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::{self, MessageTypeId};
use crate::errors::PlatformResult;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    pub message_type: String,

    #[serde(default, skip_serializing_if = "is_unversioned")]
    pub version: u32,

    #[serde(default)]
    pub payload: Option<Value>,
}

fn is_unversioned(version: &u32) -> bool {
    *version == 0
}

impl Message {
    /// Create an unversioned message.
    pub fn new(id: MessageTypeId, payload: Option<Value>) -> Self {
        Self {
            message_type: id.as_str().to_string(),
            version: 0,
            payload,
        }
    }

    /// Set the protocol version stamped on the message.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Resolve the message type against the registry.
    ///
    /// Returns `None` for spellings this controller does not know; callers log and skip those.
    pub fn type_id(&self) -> Option<MessageTypeId> {
        messages::from_str(&self.message_type)
    }

    /// Check the message type without allocating.
    pub fn is(&self, id: MessageTypeId) -> bool {
        self.message_type == id.as_str()
    }

    /// Deserialize the payload into a concrete type.
    ///
    /// A missing payload is treated as JSON `null`, so `Option<T>` and `()` targets accept it.
    pub fn payload_as<T: DeserializeOwned>(&self) -> PlatformResult<T> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}
