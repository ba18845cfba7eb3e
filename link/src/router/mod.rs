//! Routing of inbound server frames to channel consumers.
//!
//! One router task consumes the connection's inbound queue and handles frames
//! strictly one at a time, so events on a channel reach handlers in transport
//! arrival order even when a relevance or enrichment fetch is awaited.
//!
//! For each change event:
//! 1. resolve the channel key and drop events for closed channels
//! 2. run the relevance check for channels that need one (fail closed)
//! 3. enrich INSERT/UPDATE payloads, best effort and bounded
//! 4. fan out to every consumer whose filter accepts the type

pub mod enrichment;
pub mod relevance;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

pub use enrichment::{Enricher, ProfileDirectory, ProfileEnricher};
pub use relevance::{ConversationDirectory, ParticipantRelevance, RelevanceCheck};

use crate::{
    error::LinkError,
    event_handlers::{ConnectionError, EventHandlers},
    models::{
        now_ms, BroadcastEvent, ChangeEvent, ChangeType, ChannelKey, ChannelKind,
        RawChangeEvent, ServerMessage,
    },
    subscription::SubscriptionRegistry,
    timeouts::{bounded, LinkTimeouts},
};

/// Classifies, filters, enriches and dispatches inbound frames.
pub struct EventRouter {
    registry: SubscriptionRegistry,
    relevance: HashMap<ChannelKind, Arc<dyn RelevanceCheck>>,
    enricher: Option<Arc<dyn Enricher>>,
    timeouts: LinkTimeouts,
    event_handlers: EventHandlers,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("relevance_checks", &self.relevance.len())
            .field("enricher", &self.enricher.is_some())
            .finish()
    }
}

impl EventRouter {
    pub fn new(
        registry: SubscriptionRegistry,
        timeouts: LinkTimeouts,
        event_handlers: EventHandlers,
    ) -> Self {
        Self {
            registry,
            relevance: HashMap::new(),
            enricher: None,
            timeouts,
            event_handlers,
        }
    }

    /// Register the relevance check for a channel family.
    ///
    /// Families that need one (direct messages, conversation updates) drop
    /// every event until a check is registered.
    pub fn with_relevance(mut self, kind: ChannelKind, check: Arc<dyn RelevanceCheck>) -> Self {
        self.relevance.insert(kind, check);
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Process frames until the connection task goes away.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<ServerMessage>) {
        while let Some(message) = inbound.recv().await {
            self.route(message).await;
        }
        log::debug!("[realtime-link] Router stopped");
    }

    /// Route one frame. Returns the number of consumers that received it.
    pub async fn route(&self, message: ServerMessage) -> usize {
        match message {
            ServerMessage::Change { channel, event } => self.route_change(&channel, event).await,
            ServerMessage::Broadcast {
                channel,
                event,
                payload,
            } => self.route_broadcast(&channel, event, payload),
            ServerMessage::Subscribed { channel } => {
                let Some(key) = resolve(&channel) else {
                    return 0;
                };
                let recovered = self.registry.mark_joined(&key);
                if !recovered.is_empty() {
                    log::info!("[realtime-link] Channel '{}' re-established", key);
                }
                for handlers in &recovered {
                    handlers.dispatch_resubscribed(&key);
                }
                recovered.len()
            },
            ServerMessage::SubscribeError { channel, message } => {
                let Some(key) = resolve(&channel) else {
                    return 0;
                };
                log::warn!("[realtime-link] Subscription to '{}' rejected: {}", key, message);
                let affected = self.registry.mark_rejected(&key, &message);
                self.event_handlers.emit_error(ConnectionError::new(
                    format!("Subscription to '{}' rejected: {}", key, message),
                    false,
                ));
                for handlers in &affected {
                    handlers.dispatch_rejected(&key, &message);
                }
                affected.len()
            },
            ServerMessage::HeartbeatAck | ServerMessage::Error { .. } => 0,
        }
    }

    async fn route_change(&self, channel: &str, raw: RawChangeEvent) -> usize {
        let Some(key) = resolve(channel) else {
            return 0;
        };
        if !self.registry.has_channel(&key) {
            log::debug!("[realtime-link] Event for closed channel '{}' dropped", key);
            return 0;
        }
        if key.table() != Some(raw.table.as_str()) {
            log::warn!(
                "[realtime-link] '{}' row on channel '{}' does not belong there, dropped",
                raw.table,
                key
            );
            return 0;
        }

        let mut event = match ChangeEvent::from_raw(key, raw) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("[realtime-link] {}", e);
                return 0;
            },
        };

        if event.key.requires_relevance_check() && !self.is_relevant(&event).await {
            return 0;
        }

        if matches!(event.event_type, ChangeType::Insert | ChangeType::Update) {
            event.enrichment = self.enrich(&event).await;
        }

        let targets = self.registry.targets(&event.key, Some(event.event_type));
        let mut delivered = 0;
        for target in targets {
            if !self.registry.is_active(&event.key, target.consumer_id) {
                continue;
            }
            target.handlers.dispatch_change(&event);
            delivered += 1;
        }
        delivered
    }

    fn route_broadcast(&self, channel: &str, event: String, payload: serde_json::Value) -> usize {
        let Some(key) = resolve(channel) else {
            return 0;
        };
        let signal = BroadcastEvent {
            key,
            event,
            payload,
            received_at_ms: now_ms(),
        };
        let mut delivered = 0;
        for target in self.registry.targets(&signal.key, None) {
            if !self.registry.is_active(&signal.key, target.consumer_id) {
                continue;
            }
            target.handlers.dispatch_broadcast(&signal);
            delivered += 1;
        }
        delivered
    }

    async fn is_relevant(&self, event: &ChangeEvent) -> bool {
        let Some(check) = self.relevance.get(&event.key.kind()) else {
            log::warn!(
                "[realtime-link] No relevance check for '{}', event dropped",
                event.key
            );
            return false;
        };
        match bounded(self.timeouts.relevance_timeout, check.is_relevant(&event.key, event)).await
        {
            Some(Ok(true)) => true,
            Some(Ok(false)) => {
                log::debug!(
                    "[realtime-link] Irrelevant {} on '{}' dropped",
                    event.event_type,
                    event.key
                );
                false
            },
            Some(Err(e)) => {
                log::warn!(
                    "[realtime-link] Relevance check failed on '{}', event dropped: {}",
                    event.key,
                    e
                );
                false
            },
            None => {
                log::warn!(
                    "[realtime-link] Relevance check timed out on '{}', event dropped",
                    event.key
                );
                false
            },
        }
    }

    async fn enrich(&self, event: &ChangeEvent) -> Option<serde_json::Map<String, serde_json::Value>> {
        let enricher = self.enricher.as_ref()?;
        let failure = match bounded(self.timeouts.enrichment_timeout, enricher.enrich(event)).await {
            Some(Ok(fields)) => return fields,
            Some(Err(e)) => LinkError::EnrichmentFailed(e.to_string()),
            None => LinkError::EnrichmentFailed(format!(
                "timed out after {:?}",
                self.timeouts.enrichment_timeout
            )),
        };
        log::warn!(
            "[realtime-link] {} on '{}', delivering without it",
            failure,
            event.key
        );
        None
    }
}

fn resolve(channel: &str) -> Option<ChannelKey> {
    match ChannelKey::parse(channel) {
        Ok(key) => Some(key),
        Err(e) => {
            log::warn!("[realtime-link] Frame for unknown channel dropped: {}", e);
            None
        },
    }
}
