//! The single shared realtime connection.
//!
//! - [`manager`]: the connection task (actor) and its [`ConnectionManager`] handle
//! - [`transport`]: the [`Transport`] / [`TransportLink`] seam
//! - [`websocket`]: the `tokio-tungstenite` transport

pub mod manager;
pub mod transport;
pub mod websocket;

pub use manager::{ConnectionManager, ListenerId};
pub use transport::{Inbound, Transport, TransportLink};
pub use websocket::WebSocketTransport;

/// Maximum text message size (64 MiB).
pub(crate) const MAX_WS_TEXT_MESSAGE_BYTES: usize = 64 << 20;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: std::time::Duration =
    std::time::Duration::from_secs(100 * 365 * 24 * 3600);
