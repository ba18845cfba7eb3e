//! Client-side real-time event distribution.
//!
//! One shared connection to a realtime server, multiplexed into ref-counted
//! logical channels. Inbound change events are filtered for relevance,
//! enriched, and fanned out to every consumer of the channel; the
//! reconciliation layer merges them with optimistic local writes so each
//! entity appears exactly once. Typing indicators ride ephemeral broadcast
//! channels.
//!
//! # Example
//!
//! ```rust,no_run
//! use realtime_link::{ChannelHandlers, ConnectionState, EventHandlers, RealtimeClient};
//!
//! # async fn example() -> realtime_link::Result<()> {
//! let client = RealtimeClient::builder()
//!     .base_url("https://realtime.example.com")
//!     .event_handlers(EventHandlers::new().on_state_change(|state| {
//!         if state == ConnectionState::ReconnectExhausted {
//!             eprintln!("realtime unavailable");
//!         }
//!     }))
//!     .build()?;
//!
//! let handle = client
//!     .subscribe("comments_post_42", ChannelHandlers::new().on_change(|e| println!("{:?}", e)))
//!     .await?;
//! drop(handle); // last consumer gone: channel torn down
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod reconcile;
pub mod router;
pub mod subscription;
pub mod timeouts;
pub mod typing;

pub use client::{RealtimeClient, RealtimeClientBuilder};
pub use connection::{ConnectionManager, Inbound, ListenerId, Transport, TransportLink, WebSocketTransport};
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    BroadcastEvent, ChangeEvent, ChangeType, ChannelKey, ChannelKind, ChannelStatus,
    ClientMessage, ConnectionOptions, ConnectionState, EventFilter, RawChangeEvent,
    ReconnectState, ServerMessage, SubscriptionInfo,
};
pub use reconcile::{
    Applied, Comment, CommentDraft, CommentFeed, CommentWriter, CommunityMessage,
    CommunityMessageDraft, CommunityMessageFeed, CommunityMessageWriter, DirectMessage,
    DirectMessageFeed, Entry, Feed, MessageDraft, MessageWriter, Reconcilable, ReconcileConfig,
    ReconciledCollection,
};
pub use router::{
    ConversationDirectory, Enricher, EventRouter, ParticipantRelevance, ProfileDirectory,
    ProfileEnricher, RelevanceCheck,
};
pub use subscription::{ChannelHandlers, ConsumerId, SubscriptionHandle, SubscriptionRegistry};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
pub use typing::{TypingChannel, TypingConfig, TYPING_EVENT};
