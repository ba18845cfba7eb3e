//! Transport seam between the connection task and the wire.
//!
//! The connection task only ever talks to a [`TransportLink`]; production
//! code opens one over a WebSocket, tests script one in memory.

use async_trait::async_trait;

use crate::error::Result;
use crate::event_handlers::DisconnectReason;
use crate::models::{ClientMessage, ServerMessage};

/// Something that can open a fresh link to the realtime server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open and confirm a new link. Bounded by the caller.
    async fn open(&self) -> Result<Box<dyn TransportLink>>;
}

/// Next item read from an open link.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A decoded server frame, with its raw text for debug hooks.
    Message { message: ServerMessage, raw: String },
    /// The peer closed the link.
    Closed(DisconnectReason),
}

/// One open, bidirectional link.
///
/// `recv` must be cancel-safe: the connection task races it against
/// commands and timers in `tokio::select!`.
#[async_trait]
pub trait TransportLink: Send {
    /// Write one frame; returns the encoded text that was sent.
    async fn send(&mut self, message: &ClientMessage) -> Result<String>;

    /// Read the next frame. Errors mean the link is unusable.
    async fn recv(&mut self) -> Result<Inbound>;

    /// Close the link gracefully. Best-effort.
    async fn close(&mut self);
}
