//! `SubscriptionHandle`: the consumer's capability for one registration.

use std::sync::Weak;

use super::registry::{ConsumerId, RegistryInner};
use crate::models::ChannelKey;

/// Keeps one consumer registered on a channel.
///
/// Call [`unsubscribe`](Self::unsubscribe) (or drop the handle) to stop
/// delivery. When the last handle for a key goes, the channel is torn down
/// server-side.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriptionHandle {
    key: ChannelKey,
    consumer_id: ConsumerId,
    registry: Weak<RegistryInner>,
    closed: bool,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key.to_string())
            .field("consumer_id", &self.consumer_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl SubscriptionHandle {
    pub(crate) fn new(key: ChannelKey, consumer_id: ConsumerId, registry: Weak<RegistryInner>) -> Self {
        Self {
            key,
            consumer_id,
            registry,
            closed: false,
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Generation tag of this registration.
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Stop delivery to this consumer.
    ///
    /// Safe to call multiple times; later calls are no-ops.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.key, self.consumer_id);
        }
    }

    /// Returns `true` once `unsubscribe()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
