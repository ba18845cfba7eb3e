//! Per-consumer channel callbacks.
//!
//! A consumer registers one [`ChannelHandlers`] set per subscription. Every
//! callback runs behind a panic guard so a failing consumer cannot stop
//! delivery to the others on the same channel.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::models::{BroadcastEvent, ChangeEvent, ChangeType, ChannelKey};

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type BroadcastCallback = Arc<dyn Fn(&BroadcastEvent) + Send + Sync>;
pub type ResubscribedCallback = Arc<dyn Fn() + Send + Sync>;
pub type RejectedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for one consumer of a channel. All optional.
///
/// `on_change` sees every accepted change event after the type-specific
/// callback (`on_insert`, `on_update`, `on_delete`) has run.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    on_insert: Option<ChangeCallback>,
    on_update: Option<ChangeCallback>,
    on_delete: Option<ChangeCallback>,
    on_change: Option<ChangeCallback>,
    on_broadcast: Option<BroadcastCallback>,
    on_resubscribed: Option<ResubscribedCallback>,
    on_rejected: Option<RejectedCallback>,
}

impl fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlers")
            .field("on_insert", &self.on_insert.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_broadcast", &self.on_broadcast.is_some())
            .field("on_resubscribed", &self.on_resubscribed.is_some())
            .field("on_rejected", &self.on_rejected.is_some())
            .finish()
    }
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Arc::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(f));
        self
    }

    /// Catch-all for every accepted change event.
    pub fn on_change(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    /// Ephemeral signals on broadcast channels (typing).
    pub fn on_broadcast(mut self, f: impl Fn(&BroadcastEvent) + Send + Sync + 'static) -> Self {
        self.on_broadcast = Some(Arc::new(f));
        self
    }

    /// The channel was re-established after a reconnect. Events published
    /// while offline were missed, so this is the place to refetch.
    pub fn on_resubscribed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_resubscribed = Some(Arc::new(f));
        self
    }

    /// The server refused the channel subscription.
    pub fn on_rejected(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_rejected = Some(Arc::new(f));
        self
    }

    /// Run the callbacks for a change event. Returns `false` if any panicked.
    pub(crate) fn dispatch_change(&self, event: &ChangeEvent) -> bool {
        let specific = match event.event_type {
            ChangeType::Insert => &self.on_insert,
            ChangeType::Update => &self.on_update,
            ChangeType::Delete => &self.on_delete,
        };
        let mut ok = true;
        if let Some(cb) = specific {
            ok &= isolate(&event.key, event.event_type.as_str(), || cb(event));
        }
        if let Some(cb) = &self.on_change {
            ok &= isolate(&event.key, "change", || cb(event));
        }
        ok
    }

    pub(crate) fn dispatch_broadcast(&self, event: &BroadcastEvent) -> bool {
        match &self.on_broadcast {
            Some(cb) => isolate(&event.key, "broadcast", || cb(event)),
            None => true,
        }
    }

    pub(crate) fn dispatch_resubscribed(&self, key: &ChannelKey) {
        if let Some(cb) = &self.on_resubscribed {
            isolate(key, "resubscribed", || cb());
        }
    }

    pub(crate) fn dispatch_rejected(&self, key: &ChannelKey, message: &str) {
        if let Some(cb) = &self.on_rejected {
            isolate(key, "rejected", || cb(message));
        }
    }
}

/// Run one consumer callback, containing any panic.
fn isolate(key: &ChannelKey, what: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            log::warn!(
                "[realtime-link] {} handler on '{}' panicked: {}",
                what,
                key,
                panic_message(panic.as_ref())
            );
            false
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: ChangeType) -> ChangeEvent {
        ChangeEvent {
            event_type,
            table: "comments".to_string(),
            schema: "public".to_string(),
            key: ChannelKey::comments("post", "p1"),
            payload: json!({ "id": "c1" }),
            old: None,
            enrichment: None,
            received_at_ms: 0,
        }
    }

    #[test]
    fn test_specific_then_catch_all() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let handlers = ChannelHandlers::new()
            .on_update(move |_| o1.lock().push("update"))
            .on_change(move |_| o2.lock().push("change"));

        assert!(handlers.dispatch_change(&event(ChangeType::Update)));
        assert!(handlers.dispatch_change(&event(ChangeType::Insert)));
        assert_eq!(*order.lock(), vec!["update", "change", "change"]);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let handlers = ChannelHandlers::new()
            .on_insert(|_| panic!("consumer bug"))
            .on_change(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            });

        assert!(!handlers.dispatch_change(&event(ChangeType::Insert)));
        assert_eq!(seen.load(Ordering::SeqCst), 1, "catch-all still runs after a panic");
    }
}
