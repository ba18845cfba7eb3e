use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the shared connection.
///
/// `disconnected → connecting → connected → disconnected`, with
/// `ReconnectExhausted` as the terminal state after automatic reconnection
/// gives up. Only an explicit `connect()` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectExhausted,
}

impl ConnectionState {
    /// Coarse public form: `"connected" | "connecting" | "disconnected"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected | Self::ReconnectExhausted => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the UI should show an offline indicator.
    pub fn is_offline(&self) -> bool {
        !self.is_connected()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReconnectExhausted => f.write_str("reconnect_exhausted"),
            other => f.write_str(other.as_str()),
        }
    }
}
