//! Message (de)serialization.

use serde::Serialize;
use serde_json::Value;

use testplatform_core::protocol::DEFAULT_PROTOCOL_VERSION;
use testplatform_core::{Message, MessageTypeId, PlatformResult};

/// Turns typed messages into wire text and back.
pub trait DataSerializer: Send + Sync {
    /// Serialize a message. Versions at or below the default are written without a version field.
    fn serialize_message(&self, id: MessageTypeId, payload: Option<Value>, version: u32) -> PlatformResult<String>;

    fn deserialize_message(&self, raw: &str) -> PlatformResult<Message>;
}

/// JSON envelope serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataSerializer;

impl DataSerializer for JsonDataSerializer {
    fn serialize_message(&self, id: MessageTypeId, payload: Option<Value>, version: u32) -> PlatformResult<String> {
        let mut message = Message::new(id, payload);
        if version > DEFAULT_PROTOCOL_VERSION {
            message = message.with_version(version);
        }
        Ok(serde_json::to_string(&message)?)
    }

    fn deserialize_message(&self, raw: &str) -> PlatformResult<Message> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Serialize a typed payload through `serializer`.
pub fn serialize_payload<T: Serialize + ?Sized>(
    serializer: &dyn DataSerializer,
    id: MessageTypeId,
    payload: &T,
    version: u32,
) -> PlatformResult<String> {
    let value = serde_json::to_value(payload)?;
    serializer.serialize_message(id, Some(value), version)
}
