//! Top-level client with builder pattern.
//!
//! Wires the shared connection, the subscription registry and the router
//! task together. Feature code gets a [`SubscriptionRegistry`] from
//! [`RealtimeClient::registry`] to open feeds and typing channels.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    connection::{ConnectionManager, Transport, WebSocketTransport},
    error::{LinkError, Result},
    event_handlers::EventHandlers,
    models::{ChannelKind, ConnectionOptions, ConnectionState, EventFilter, SubscriptionInfo},
    router::{Enricher, EventRouter, RelevanceCheck},
    subscription::{ChannelHandlers, SubscriptionHandle, SubscriptionRegistry},
    timeouts::LinkTimeouts,
    typing::{TypingChannel, TypingConfig},
};

/// Realtime client.
///
/// Use [`RealtimeClientBuilder`] to construct instances. Cloning shares the
/// same connection and registry.
///
/// # Examples
///
/// ```rust,no_run
/// use realtime_link::{ChannelHandlers, RealtimeClient};
///
/// # async fn example() -> realtime_link::Result<()> {
/// let client = RealtimeClient::builder()
///     .base_url("https://realtime.example.com")
///     .build()?;
///
/// let _handle = client
///     .subscribe(
///         "community_messages_42",
///         ChannelHandlers::new().on_insert(|event| println!("new row {:?}", event.record_id())),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    router_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.connection.state())
            .field("channels", &self.registry.active_subscription_count())
            .finish()
    }
}

impl RealtimeClient {
    pub fn builder() -> RealtimeClientBuilder {
        RealtimeClientBuilder::new()
    }

    /// Open the shared connection. Concurrent calls share one attempt.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Close the connection intentionally. Channels stay registered and are
    /// re-issued on the next `connect()`.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Stop the connection task and the router task.
    ///
    /// Both tasks outlive dropped clients; call this when done. Feeds and
    /// typing channels opened from this client stop receiving afterwards.
    pub fn shutdown(&self) {
        log::info!("[realtime-link] Shutting down client");
        self.connection.shutdown();
        if let Some(task) = self.router_task.lock().take() {
            task.abort();
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to a channel for every change type. Connects if needed.
    pub async fn subscribe(
        &self,
        key: &str,
        handlers: ChannelHandlers,
    ) -> Result<SubscriptionHandle> {
        self.registry.subscribe(key, handlers).await
    }

    pub async fn subscribe_filtered(
        &self,
        key: &str,
        filter: EventFilter,
        handlers: ChannelHandlers,
    ) -> Result<SubscriptionHandle> {
        self.registry.subscribe_filtered(key, filter, handlers).await
    }

    /// Number of open channels (not consumers).
    pub fn active_subscription_count(&self) -> usize {
        self.registry.active_subscription_count()
    }

    pub fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.list_subscriptions()
    }

    /// Typing indicator for one content item, as `actor_id`.
    pub async fn typing(
        &self,
        content_type: &str,
        content_id: &str,
        actor_id: &str,
    ) -> Result<TypingChannel> {
        TypingChannel::open(&self.registry, content_type, content_id, actor_id).await
    }

    pub async fn typing_with_config(
        &self,
        content_type: &str,
        content_id: &str,
        actor_id: &str,
        config: TypingConfig,
    ) -> Result<TypingChannel> {
        TypingChannel::open_with_config(&self.registry, content_type, content_id, actor_id, config)
            .await
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

/// Builder for configuring [`RealtimeClient`] instances.
pub struct RealtimeClientBuilder {
    base_url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    options: ConnectionOptions,
    timeouts: LinkTimeouts,
    event_handlers: EventHandlers,
    relevance: Vec<(ChannelKind, Arc<dyn RelevanceCheck>)>,
    enricher: Option<Arc<dyn Enricher>>,
}

impl RealtimeClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            transport: None,
            options: ConnectionOptions::default(),
            timeouts: LinkTimeouts::default(),
            event_handlers: EventHandlers::default(),
            relevance: Vec::new(),
            enricher: None,
        }
    }

    /// Server URL; `http(s)` is mapped to `ws(s)`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Use a custom transport instead of the WebSocket one. Takes precedence
    /// over `base_url`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// # Example
    ///
    /// ```rust,no_run
    /// use realtime_link::{LinkTimeouts, RealtimeClient};
    ///
    /// # fn example() -> realtime_link::Result<()> {
    /// let client = RealtimeClient::builder()
    ///     .base_url("http://localhost:4000")
    ///     .timeouts(LinkTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Relevance check for a channel family that carries other users' rows.
    pub fn relevance_check(mut self, kind: ChannelKind, check: Arc<dyn RelevanceCheck>) -> Self {
        self.relevance.push((kind, check));
        self
    }

    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Build the client and spawn its background tasks.
    ///
    /// Must be called inside a tokio runtime. Nothing is opened until the
    /// first `connect()` or `subscribe()`.
    pub fn build(self) -> Result<RealtimeClient> {
        let transport: Arc<dyn Transport> = match (self.transport, self.base_url) {
            (Some(transport), _) => transport,
            (None, Some(base_url)) => Arc::new(WebSocketTransport::new(&base_url, &self.options)?),
            (None, None) => {
                return Err(LinkError::ConfigurationError(
                    "base_url or transport is required".to_string(),
                ))
            },
        };

        let max_channels = self.options.max_channels;
        let (connection, inbound) = ConnectionManager::new(
            transport,
            self.options,
            self.timeouts.clone(),
            self.event_handlers.clone(),
        )?;
        let registry = SubscriptionRegistry::new(connection.clone(), max_channels);

        let mut router = EventRouter::new(registry.clone(), self.timeouts, self.event_handlers);
        for (kind, check) in self.relevance {
            router = router.with_relevance(kind, check);
        }
        if let Some(enricher) = self.enricher {
            router = router.with_enricher(enricher);
        }
        let router_task = tokio::spawn(router.run(inbound));

        Ok(RealtimeClient {
            connection,
            registry,
            router_task: Arc::new(Mutex::new(Some(router_task))),
        })
    }
}
