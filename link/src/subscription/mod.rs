//! Channel subscriptions.
//!
//! - [`registry`]: ref-counted channels over the shared connection
//! - [`handle`]: the disposable per-consumer handle
//! - [`handlers`]: per-consumer callbacks with panic isolation

pub mod handle;
pub mod handlers;
pub mod registry;

pub use handle::SubscriptionHandle;
pub use handlers::ChannelHandlers;
pub use registry::{ConsumerId, SubscriptionRegistry};
