//! Reference-counted channel subscriptions multiplexed over one connection.
//!
//! Each [`ChannelKey`] maps to one server-side channel, no matter how many
//! consumers hold it. The first consumer issues the `subscribe` frame, the
//! last one to leave sends `unsubscribe`. The registry listens to the
//! connection: channels go stale when the link drops and are re-issued on
//! the next transition into `connected`.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;

use super::handle::SubscriptionHandle;
use super::handlers::ChannelHandlers;
use crate::{
    connection::{ConnectionManager, ListenerId},
    error::{LinkError, Result},
    models::{
        now_ms, ChangeType, ChannelKey, ChannelStatus, ClientMessage, ConnectionState,
        EventFilter, SubscriptionInfo,
    },
};

/// Identifies one consumer registration. Never reused, so it doubles as a
/// generation tag for handles.
pub type ConsumerId = u64;

struct Consumer {
    id: ConsumerId,
    filter: EventFilter,
    handlers: Arc<ChannelHandlers>,
}

struct ChannelEntry {
    consumers: Vec<Consumer>,
    status: ChannelStatus,
    /// Filter carried by the last `subscribe` frame.
    issued_filter: EventFilter,
    /// Re-issued after a drop; consumers get `on_resubscribed` once joined.
    recovering: bool,
    created_at_ms: u64,
    last_event_time_ms: Option<u64>,
}

impl ChannelEntry {
    fn new() -> Self {
        Self {
            consumers: Vec::new(),
            status: ChannelStatus::Pending,
            issued_filter: EventFilter::none(),
            recovering: false,
            created_at_ms: now_ms(),
            last_event_time_ms: None,
        }
    }

    fn filter(&self) -> EventFilter {
        self.consumers
            .iter()
            .fold(EventFilter::none(), |acc, c| acc.union(c.filter))
    }

    fn handlers(&self) -> Vec<Arc<ChannelHandlers>> {
        self.consumers.iter().map(|c| c.handlers.clone()).collect()
    }
}

/// A consumer selected for delivery of one event.
pub(crate) struct Target {
    pub(crate) consumer_id: ConsumerId,
    pub(crate) handlers: Arc<ChannelHandlers>,
}

pub(crate) struct RegistryInner {
    connection: ConnectionManager,
    max_channels: usize,
    channels: Mutex<HashMap<ChannelKey, ChannelEntry>>,
    next_consumer_id: AtomicU64,
    listener_id: ListenerId,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.connection.remove_state_listener(self.listener_id);
    }
}

impl RegistryInner {
    fn on_connection_state(&self, state: ConnectionState) {
        let mut channels = self.channels.lock();
        if state.is_connected() {
            let mut reissued = 0usize;
            for (key, entry) in channels.iter_mut() {
                if entry.status.needs_issue() {
                    entry.recovering = entry.status == ChannelStatus::Stale;
                    self.issue(key, entry);
                    reissued += 1;
                }
            }
            if reissued > 0 {
                log::info!("[realtime-link] Issued {} channel subscription(s)", reissued);
            }
        } else {
            for entry in channels.values_mut() {
                if matches!(entry.status, ChannelStatus::Issued | ChannelStatus::Joined) {
                    entry.status = ChannelStatus::Stale;
                }
            }
        }
    }

    /// Send the `subscribe` frame for the entry's current filter.
    fn issue(&self, key: &ChannelKey, entry: &mut ChannelEntry) {
        let filter = entry.filter();
        let events = if key.is_ephemeral() {
            Vec::new()
        } else {
            filter.event_types()
        };
        log::debug!("[realtime-link] Subscribing to '{}' ({:?})", key, events);
        self.connection.send(ClientMessage::Subscribe {
            channel: key.to_string(),
            table: key.table().map(str::to_string),
            filter: key.server_filter(),
            events,
        });
        entry.status = ChannelStatus::Issued;
        entry.issued_filter = filter;
    }

    /// Remove one consumer. Tears the channel down at ref-count zero.
    pub(crate) fn release(&self, key: &ChannelKey, consumer_id: ConsumerId) -> bool {
        let mut channels = self.channels.lock();
        let Some(entry) = channels.get_mut(key) else {
            return false;
        };
        let before = entry.consumers.len();
        entry.consumers.retain(|c| c.id != consumer_id);
        if entry.consumers.len() == before {
            log::debug!(
                "[realtime-link] Ignoring stale unsubscribe for '{}' (consumer {})",
                key,
                consumer_id
            );
            return false;
        }

        if entry.consumers.is_empty() {
            if let Some(entry) = channels.remove(key) {
                if matches!(entry.status, ChannelStatus::Issued | ChannelStatus::Joined) {
                    self.connection.send(ClientMessage::Unsubscribe {
                        channel: key.to_string(),
                    });
                }
                log::debug!("[realtime-link] Channel '{}' closed", key);
            }
        }
        true
    }
}

/// Registry of open channels. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.active_subscription_count())
            .field("max_channels", &self.inner.max_channels)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new(connection: ConnectionManager, max_channels: usize) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<RegistryInner>| {
            let weak = weak.clone();
            let listener_id = connection.on_state_change(move |state| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_connection_state(state);
                }
            });
            RegistryInner {
                connection,
                max_channels,
                channels: Mutex::new(HashMap::new()),
                next_consumer_id: AtomicU64::new(1),
                listener_id,
            }
        });
        Self { inner }
    }

    /// Subscribe to a channel for every change type.
    pub async fn subscribe(
        &self,
        key: &str,
        handlers: ChannelHandlers,
    ) -> Result<SubscriptionHandle> {
        self.subscribe_filtered(key, EventFilter::all(), handlers).await
    }

    /// Subscribe to a channel for the change types in `filter`.
    ///
    /// Key validation and the channel quota are checked before anything is
    /// awaited. The subscribe frame goes out as soon as the connection is
    /// live; this call awaits `connect()` when it is not.
    pub async fn subscribe_filtered(
        &self,
        key: &str,
        filter: EventFilter,
        handlers: ChannelHandlers,
    ) -> Result<SubscriptionHandle> {
        let handle = self.register(key, filter, handlers)?;
        if !self.inner.connection.state().is_connected() {
            // Dropping the handle on failure releases the registration.
            self.inner.connection.connect().await?;
        }
        Ok(handle)
    }

    /// Synchronous half of subscribe: validate, count, and issue if live.
    pub fn register(
        &self,
        key: &str,
        filter: EventFilter,
        handlers: ChannelHandlers,
    ) -> Result<SubscriptionHandle> {
        let key = ChannelKey::parse(key)?;
        if filter.is_empty() {
            return Err(LinkError::SubscriptionRejected(format!(
                "empty event filter for '{}'",
                key
            )));
        }

        let mut channels = self.inner.channels.lock();
        if !channels.contains_key(&key) && channels.len() >= self.inner.max_channels {
            return Err(LinkError::SubscriptionRejected(format!(
                "channel limit ({}) reached, cannot open '{}'",
                self.inner.max_channels, key
            )));
        }

        let consumer_id = self.inner.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        let connected = self.inner.connection.state().is_connected();
        let entry = channels.entry(key.clone()).or_insert_with(ChannelEntry::new);
        entry.consumers.push(Consumer {
            id: consumer_id,
            filter,
            handlers: Arc::new(handlers),
        });

        if matches!(entry.status, ChannelStatus::Rejected(_)) {
            entry.status = ChannelStatus::Pending;
        }
        let should_issue = match entry.status {
            ChannelStatus::Pending => connected,
            // A wider consumer joined: widen the server-side filter.
            ChannelStatus::Issued | ChannelStatus::Joined => {
                !entry.issued_filter.covers(&entry.filter())
            },
            _ => false,
        };
        if should_issue {
            self.inner.issue(&key, entry);
        }
        log::debug!(
            "[realtime-link] Consumer {} joined '{}' (ref_count={})",
            consumer_id,
            key,
            entry.consumers.len()
        );

        Ok(SubscriptionHandle::new(
            key,
            consumer_id,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Number of open channels (keys with at least one consumer).
    pub fn active_subscription_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Number of consumers holding `key`; zero for unknown or malformed keys.
    pub fn ref_count(&self, key: &str) -> usize {
        let Ok(key) = ChannelKey::parse(key) else {
            return 0;
        };
        self.inner
            .channels
            .lock()
            .get(&key)
            .map_or(0, |entry| entry.consumers.len())
    }

    /// Snapshot of every open channel, sorted by key.
    pub fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let channels = self.inner.channels.lock();
        let mut infos: Vec<SubscriptionInfo> = channels
            .iter()
            .map(|(key, entry)| SubscriptionInfo {
                key: key.to_string(),
                ref_count: entry.consumers.len(),
                status: entry.status.clone(),
                filter: entry.filter(),
                created_at_ms: entry.created_at_ms,
                last_event_time_ms: entry.last_event_time_ms,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub(crate) fn has_channel(&self, key: &ChannelKey) -> bool {
        self.inner.channels.lock().contains_key(key)
    }

    /// Consumers that accept `event_type` (all consumers for broadcasts),
    /// in registration order. Stamps the channel's last-event time.
    pub(crate) fn targets(&self, key: &ChannelKey, event_type: Option<ChangeType>) -> Vec<Target> {
        let mut channels = self.inner.channels.lock();
        let Some(entry) = channels.get_mut(key) else {
            return Vec::new();
        };
        entry.last_event_time_ms = Some(now_ms());
        entry
            .consumers
            .iter()
            .filter(|c| event_type.map_or(true, |ty| c.filter.accepts(ty)))
            .map(|c| Target {
                consumer_id: c.id,
                handlers: c.handlers.clone(),
            })
            .collect()
    }

    /// Whether the consumer is still registered. Checked right before each
    /// callback so an unsubscribe takes effect immediately.
    pub(crate) fn is_active(&self, key: &ChannelKey, consumer_id: ConsumerId) -> bool {
        self.inner
            .channels
            .lock()
            .get(key)
            .is_some_and(|entry| entry.consumers.iter().any(|c| c.id == consumer_id))
    }

    /// Server confirmed the channel. Returns the consumers to notify with
    /// `on_resubscribed` when this completes a recovery.
    pub(crate) fn mark_joined(&self, key: &ChannelKey) -> Vec<Arc<ChannelHandlers>> {
        let mut channels = self.inner.channels.lock();
        let Some(entry) = channels.get_mut(key) else {
            return Vec::new();
        };
        entry.status = ChannelStatus::Joined;
        if std::mem::take(&mut entry.recovering) {
            entry.handlers()
        } else {
            Vec::new()
        }
    }

    /// Server refused the channel. Returns the consumers to notify.
    pub(crate) fn mark_rejected(&self, key: &ChannelKey, message: &str) -> Vec<Arc<ChannelHandlers>> {
        let mut channels = self.inner.channels.lock();
        let Some(entry) = channels.get_mut(key) else {
            return Vec::new();
        };
        entry.status = ChannelStatus::Rejected(message.to_string());
        entry.recovering = false;
        entry.handlers()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }
}
