//! Data models for realtime-link.
//!
//! Wire frames exchanged with the realtime server, the routed event shapes
//! handed to consumers, and connection configuration.

pub mod broadcast_event;
pub mod change_event;
pub mod change_type;
pub mod channel_key;
pub mod client_message;
pub mod connection_options;
pub mod connection_state;
pub mod event_filter;
pub mod reconnect_state;
pub mod server_message;
pub mod subscription_info;
pub mod utils;

#[cfg(test)]
mod tests;

pub use broadcast_event::BroadcastEvent;
pub use change_event::{ChangeEvent, RawChangeEvent};
pub use change_type::ChangeType;
pub use channel_key::{ChannelKey, ChannelKind};
pub use client_message::ClientMessage;
pub use connection_options::ConnectionOptions;
pub use connection_state::ConnectionState;
pub use event_filter::EventFilter;
pub use reconnect_state::ReconnectState;
pub use server_message::ServerMessage;
pub use subscription_info::{ChannelStatus, SubscriptionInfo};
pub use utils::now_ms;
