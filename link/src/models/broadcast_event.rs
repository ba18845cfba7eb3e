use serde_json::Value as JsonValue;

use super::channel_key::ChannelKey;

/// An ephemeral signal received on a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEvent {
    pub key: ChannelKey,
    /// Signal name, e.g. `"typing"`.
    pub event: String,
    pub payload: JsonValue,
    pub received_at_ms: u64,
}
