use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::ItemId;
use crate::{QueueError, QueueResult};

/// Immutable queue item - an identifier plus an opaque payload
///
/// The wire form is a JSON object with exactly two keys, `id` and `payload`.
/// The engine never looks inside `payload`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    id: ItemId,
    payload: Value,
}

impl Item {
    /// Create an item with a freshly generated id
    pub fn new(payload: Value) -> Self {
        Self {
            id: ItemId::new(),
            payload,
        }
    }

    /// Create an item with a caller-supplied id
    pub fn with_id(id: impl Into<ItemId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Build an item from any serializable payload
    pub fn from_serializable<T: Serialize>(payload: &T) -> QueueResult<Self> {
        Ok(Self::new(serde_json::to_value(payload)?))
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Deserialize the payload into a caller type
    pub fn payload_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Encode to the wire form
    pub fn encode(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire record, rejecting records without `id` or `payload`
    pub fn decode(record: &str) -> QueueResult<Self> {
        let value: Value = serde_json::from_str(record)?;
        let Value::Object(mut fields) = value else {
            return Err(QueueError::InvalidItem("record is not an object".to_string()));
        };

        let id = match fields.remove("id") {
            Some(Value::String(id)) => ItemId(id),
            Some(other) => {
                return Err(QueueError::InvalidItem(format!("id must be a string, got {}", other)))
            }
            None => return Err(QueueError::InvalidItem("missing id".to_string())),
        };

        // `null` is a legitimate payload; only an absent key is rejected
        let payload = fields
            .remove("payload")
            .ok_or_else(|| QueueError::InvalidItem(format!("missing payload for {}", id)))?;

        Ok(Self { id, payload })
    }
}
