//! Subscription metadata exposed to callers.
//!
//! [`SubscriptionInfo`] provides a read-only snapshot of an open channel,
//! useful for debugging, tests, and connection dashboards.

use serde::{Deserialize, Serialize};

use super::event_filter::EventFilter;

/// Server-side status of a channel held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Registered locally, waiting for a live connection.
    Pending,
    /// Subscribe frame sent on the current connection.
    Issued,
    /// Server confirmed the subscription.
    Joined,
    /// The connection dropped; will be re-issued on recovery.
    Stale,
    /// Server refused the subscription. Retried on the next connection.
    Rejected(String),
}

impl ChannelStatus {
    /// Whether a subscribe frame must be (re-)sent once connected.
    pub fn needs_issue(&self) -> bool {
        matches!(self, Self::Pending | Self::Stale | Self::Rejected(_))
    }
}

/// Read-only snapshot of an open channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Channel key in string form.
    pub key: String,
    /// Number of live consumer handles.
    pub ref_count: usize,
    pub status: ChannelStatus,
    /// Union of the consumers' event filters.
    pub filter: EventFilter,
    /// Millis since Unix epoch when the channel was opened.
    pub created_at_ms: u64,
    /// Millis since Unix epoch of the last delivered event, if any.
    pub last_event_time_ms: Option<u64>,
}
