use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::change_event::RawChangeEvent;

/// Frames sent from the realtime server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The channel subscription is active server-side.
    Subscribed { channel: String },

    /// The server refused the channel subscription.
    SubscribeError { channel: String, message: String },

    /// A row change on a subscribed channel.
    Change {
        channel: String,
        event: RawChangeEvent,
    },

    /// An ephemeral signal relayed from another client.
    Broadcast {
        channel: String,
        event: String,
        #[serde(default)]
        payload: JsonValue,
    },

    /// Reply to a client heartbeat.
    HeartbeatAck,

    /// Connection-level error notification.
    Error { message: String },
}

impl ServerMessage {
    /// Channel this frame belongs to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Subscribed { channel }
            | Self::SubscribeError { channel, .. }
            | Self::Change { channel, .. }
            | Self::Broadcast { channel, .. } => Some(channel.as_str()),
            Self::HeartbeatAck | Self::Error { .. } => None,
        }
    }
}
