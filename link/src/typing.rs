//! Typing indicators over an ephemeral broadcast channel.
//!
//! Signals are fire-and-forget: nothing is persisted, retried, or ordered.
//! Each received signal marks its actor as typing for a fixed TTL; a repeat
//! from the same actor restarts the TTL instead of stacking timers (every
//! signal bumps the actor's generation and only the timer of the latest
//! generation may expire it).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{
    connection::ConnectionManager,
    error::Result,
    models::{BroadcastEvent, ChannelKey, ClientMessage},
    subscription::{ChannelHandlers, SubscriptionHandle, SubscriptionRegistry},
};

/// Broadcast event name used for typing signals.
pub const TYPING_EVENT: &str = "typing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingConfig {
    /// How long a received signal keeps its actor in the active set.
    pub ttl: Duration,
    /// Minimum spacing between two outgoing signals.
    pub send_interval: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3),
            send_interval: Duration::from_secs(1),
        }
    }
}

struct Typists {
    generations: HashMap<String, u64>,
    next_generation: u64,
    active_tx: watch::Sender<Vec<String>>,
}

impl Typists {
    fn touch(&mut self, actor: &str) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        if self.generations.insert(actor.to_string(), generation).is_none() {
            self.publish();
        }
        generation
    }

    fn expire(&mut self, actor: &str, generation: u64) {
        if self.generations.get(actor) == Some(&generation) {
            self.generations.remove(actor);
            self.publish();
        }
    }

    fn clear(&mut self, actor: &str) {
        if self.generations.remove(actor).is_some() {
            self.publish();
        }
    }

    fn publish(&self) {
        let mut active: Vec<String> = self.generations.keys().cloned().collect();
        active.sort();
        self.active_tx.send_replace(active);
    }
}

/// Typing indicator for one content item (`typing_<contentType>_<contentId>`).
pub struct TypingChannel {
    key: ChannelKey,
    actor_id: String,
    config: TypingConfig,
    connection: ConnectionManager,
    typists: Arc<Mutex<Typists>>,
    active_rx: watch::Receiver<Vec<String>>,
    last_sent: Mutex<Option<Instant>>,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl std::fmt::Debug for TypingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingChannel")
            .field("key", &self.key.to_string())
            .field("actor_id", &self.actor_id)
            .field("active", &*self.active_rx.borrow())
            .finish()
    }
}

impl TypingChannel {
    pub async fn open(
        registry: &SubscriptionRegistry,
        content_type: &str,
        content_id: &str,
        actor_id: &str,
    ) -> Result<Self> {
        Self::open_with_config(registry, content_type, content_id, actor_id, TypingConfig::default())
            .await
    }

    pub async fn open_with_config(
        registry: &SubscriptionRegistry,
        content_type: &str,
        content_id: &str,
        actor_id: &str,
        config: TypingConfig,
    ) -> Result<Self> {
        let key = ChannelKey::typing(content_type, content_id);
        let (active_tx, active_rx) = watch::channel(Vec::new());
        let typists = Arc::new(Mutex::new(Typists {
            generations: HashMap::new(),
            next_generation: 0,
            active_tx,
        }));

        let handlers = {
            let typists = typists.clone();
            let own_id = actor_id.to_string();
            let ttl = config.ttl;
            ChannelHandlers::new().on_broadcast(move |signal| {
                receive(&typists, &own_id, ttl, signal);
            })
        };
        let handle = registry.subscribe(&key.to_string(), handlers).await?;

        Ok(Self {
            key,
            actor_id: actor_id.to_string(),
            config,
            connection: registry.connection().clone(),
            typists,
            active_rx,
            last_sent: Mutex::new(None),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Other actors currently typing, sorted.
    pub fn active(&self) -> Vec<String> {
        self.active_rx.borrow().clone()
    }

    /// Receiver that changes whenever the active set does.
    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.active_rx.clone()
    }

    /// Signal that the local actor is typing.
    ///
    /// Returns `false` when suppressed by the send interval. Never retried.
    pub fn send(&self) -> bool {
        {
            let mut last_sent = self.last_sent.lock();
            let now = Instant::now();
            if let Some(previous) = *last_sent {
                if now.duration_since(previous) < self.config.send_interval {
                    return false;
                }
            }
            *last_sent = Some(now);
        }
        self.broadcast(true);
        true
    }

    /// Signal that the local actor stopped typing. Not throttled.
    pub fn stop(&self) {
        *self.last_sent.lock() = None;
        self.broadcast(false);
    }

    /// Leave the channel and forget every active actor.
    pub fn close(&self) {
        if let Some(mut handle) = self.handle.lock().take() {
            handle.unsubscribe();
        }
        let mut typists = self.typists.lock();
        typists.generations.clear();
        typists.publish();
    }

    fn broadcast(&self, is_typing: bool) {
        self.connection.send(ClientMessage::Broadcast {
            channel: self.key.to_string(),
            event: TYPING_EVENT.to_string(),
            payload: json!({ "user_id": self.actor_id, "is_typing": is_typing }),
        });
    }
}

fn receive(typists: &Arc<Mutex<Typists>>, own_id: &str, ttl: Duration, signal: &BroadcastEvent) {
    if signal.event != TYPING_EVENT {
        return;
    }
    let Some(actor) = signal.payload.get("user_id").and_then(|v| v.as_str()) else {
        log::debug!("[realtime-link] Typing signal on '{}' without user_id", signal.key);
        return;
    };
    if actor == own_id {
        return;
    }

    let is_typing = signal
        .payload
        .get("is_typing")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if !is_typing {
        typists.lock().clear(actor);
        return;
    }

    let generation = typists.lock().touch(actor);
    let typists = Arc::downgrade(typists);
    let actor = actor.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Some(typists) = typists.upgrade() {
            typists.lock().expire(&actor, generation);
        }
    });
}
