use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::change_type::ChangeType;
use super::channel_key::ChannelKey;
use super::utils::now_ms;
use crate::error::{LinkError, Result};

/// Change notification exactly as the backend change feed emits it.
///
/// ```json
/// {"eventType":"INSERT","table":"community_messages","schema":"public","new":{...},"old":null}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangeEvent {
    pub event_type: ChangeType,
    pub table: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub new: Option<JsonValue>,
    #[serde(default)]
    pub old: Option<JsonValue>,
}

/// A change event after routing: classified by channel key, with the
/// relevant row extracted and optional enrichment attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub event_type: ChangeType,
    pub table: String,
    pub schema: String,
    /// Channel the event was delivered on.
    pub key: ChannelKey,
    /// The current row for INSERT/UPDATE, the removed row for DELETE.
    pub payload: JsonValue,
    /// Previous row values, when the feed provides them.
    pub old: Option<JsonValue>,
    /// Denormalized fields added by the router (e.g. `sender` profile).
    /// `None` when enrichment was not configured or failed.
    pub enrichment: Option<Map<String, JsonValue>>,
    /// Millis since Unix epoch when the event came off the transport.
    pub received_at_ms: u64,
}

impl ChangeEvent {
    /// Build a routed event from the raw feed shape.
    ///
    /// Fails when the row required by the event type is missing.
    pub fn from_raw(key: ChannelKey, raw: RawChangeEvent) -> Result<Self> {
        let RawChangeEvent {
            event_type,
            table,
            schema,
            new,
            old,
        } = raw;

        let payload = match event_type {
            ChangeType::Insert | ChangeType::Update => new,
            ChangeType::Delete => old.clone(),
        }
        .filter(|row| !row.is_null())
        .ok_or_else(|| {
            LinkError::SerializationError(format!(
                "{} event on '{}' carries no row",
                event_type, table
            ))
        })?;

        Ok(Self {
            event_type,
            table,
            schema,
            key,
            payload,
            old,
            enrichment: None,
            received_at_ms: now_ms(),
        })
    }

    /// The row's `id` column as a string (numeric ids are stringified).
    pub fn record_id(&self) -> Option<String> {
        id_of(&self.payload)
    }

    /// String field of the payload row.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(JsonValue::as_str)
    }

    /// Decode the payload row into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(LinkError::from)
    }

    /// Enrichment field by name, if enrichment succeeded.
    pub fn enrichment_field(&self, name: &str) -> Option<&JsonValue> {
        self.enrichment.as_ref().and_then(|map| map.get(name))
    }
}

/// Extract an `id` column from a JSON row.
pub(crate) fn id_of(row: &JsonValue) -> Option<String> {
    match row.get("id")? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
