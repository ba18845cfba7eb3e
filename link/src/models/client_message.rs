use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::change_type::ChangeType;

/// Frames sent from the client to the realtime server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open (or widen) a channel subscription.
    Subscribe {
        channel: String,
        /// Source table; absent for broadcast-only channels.
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        /// Server-side equality filter, e.g. `community_id=eq.42`.
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        /// Change types the server should forward.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        events: Vec<ChangeType>,
    },

    /// Tear down a channel subscription.
    Unsubscribe { channel: String },

    /// Fire-and-forget ephemeral signal on a channel.
    Broadcast {
        channel: String,
        event: String,
        payload: JsonValue,
    },

    /// Keepalive.
    Heartbeat,
}

impl ClientMessage {
    /// Channel this frame targets, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Subscribe { channel, .. }
            | Self::Unsubscribe { channel }
            | Self::Broadcast { channel, .. } => Some(channel.as_str()),
            Self::Heartbeat => None,
        }
    }

    /// Wire `type` tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Broadcast { .. } => "broadcast",
            Self::Heartbeat => "heartbeat",
        }
    }
}
