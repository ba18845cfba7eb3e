//! Connection manager for the one physical realtime connection.
//!
//! A background task owns the [`TransportLink`] and is the only place that
//! opens or closes it. The public [`ConnectionManager`] handle talks to the
//! task over an unbounded command channel. The task handles:
//!
//! - `connect()` coalescing: calls made while an attempt is in flight wait on
//!   that attempt instead of starting another
//! - reconnection with exponential backoff after an unexpected close, bounded
//!   by `max_reconnect_attempts`, ending in [`ConnectionState::ReconnectExhausted`]
//! - application-level keepalive (`heartbeat` frames and a pong deadline)
//! - synchronous state listeners, run on every transition
//!
//! Server frames other than `heartbeat_ack` are forwarded in arrival order to
//! the receiver returned by [`ConnectionManager::new`].

use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant as TokioInstant;

use super::transport::{Inbound, Transport, TransportLink};
use super::FAR_FUTURE;
use crate::{
    error::{LinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers},
    models::{ClientMessage, ConnectionOptions, ConnectionState, ReconnectState, ServerMessage},
    timeouts::{bounded, LinkTimeouts},
};

/// Identifier returned by [`ConnectionManager::on_state_change`].
pub type ListenerId = u64;

type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Commands sent from the public handle to the connection task.
enum ConnCmd {
    Connect { result_tx: oneshot::Sender<Result<()>> },
    Send { message: ClientMessage },
    Disconnect,
    Shutdown,
}

/// State readable from any handle without a round trip to the task.
struct Shared {
    state: RwLock<ConnectionState>,
    reconnect: RwLock<ReconnectState>,
    listeners: RwLock<Vec<(ListenerId, StateListener)>>,
    next_listener_id: AtomicU64,
    event_handlers: EventHandlers,
}

impl Shared {
    /// Record a transition and notify listeners synchronously.
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            log::debug!("[realtime-link] Connection state {} -> {}", *state, next);
            *state = next;
        }
        let listeners: Vec<StateListener> =
            self.listeners.read().iter().map(|(_, cb)| cb.clone()).collect();
        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(next))).is_err() {
                log::warn!("[realtime-link] State listener panicked on {}", next);
            }
        }
        self.event_handlers.emit_state_change(next);
    }
}

/// Handle to the shared connection. Cheap to clone.
///
/// The connection task runs until [`ConnectionManager::shutdown`]. A
/// [`SubscriptionRegistry`](crate::SubscriptionRegistry) and the router it
/// feeds each hold a handle, so dropping the caller's handles is not enough.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    shared: Arc<Shared>,
    timeouts: LinkTimeouts,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("reconnect", &self.reconnect_state())
            .finish()
    }
}

impl ConnectionManager {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called. The
    /// returned receiver yields every routed server frame in arrival order.
    pub fn new(
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
        timeouts: LinkTimeouts,
        event_handlers: EventHandlers,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>)> {
        options.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect: RwLock::new(ReconnectState::new(options.max_reconnect_attempts)),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            event_handlers,
        });

        let task = ConnectionTask {
            cmd_rx,
            transport,
            reconnect: ReconnectState::new(options.max_reconnect_attempts),
            options,
            timeouts: timeouts.clone(),
            shared: shared.clone(),
            inbound_tx,
            waiters: Vec::new(),
            recovering: false,
        };
        tokio::spawn(task.run());

        Ok((
            Self {
                cmd_tx,
                shared,
                timeouts,
            },
            inbound_rx,
        ))
    }

    /// Ensure the connection is live.
    ///
    /// Returns immediately when already connected. If an attempt is in
    /// flight, waits for that attempt. Bounded by `connection_timeout`.
    /// After [`ConnectionState::ReconnectExhausted`] this is the way back.
    pub async fn connect(&self) -> Result<()> {
        if self.state().is_connected() {
            return Ok(());
        }

        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Connect { result_tx })
            .map_err(|_| LinkError::InternalError("Connection task has shut down".to_string()))?;

        match bounded(self.timeouts.connection_timeout, result_rx).await {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(LinkError::Cancelled),
            None => Err(LinkError::ConnectionTimeout(format!(
                "no confirmation within {:?}",
                self.timeouts.connection_timeout
            ))),
        }
    }

    /// Close the link, cancel any pending reconnect, and clear the
    /// reconnect counter. Pending `connect()` calls fail with `Cancelled`.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Disconnect);
    }

    /// Stop the connection task. The manager is unusable afterwards.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Snapshot of the reconnect counter and current backoff delay.
    pub fn reconnect_state(&self) -> ReconnectState {
        *self.shared.reconnect.read()
    }

    /// Register a listener invoked synchronously on every state transition.
    ///
    /// Listeners run on the connection task and must not block.
    pub fn on_state_change(
        &self,
        listener: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_state_listener(&self, id: ListenerId) {
        self.shared.listeners.write().retain(|(existing, _)| *existing != id);
    }

    /// Queue a frame for the live link. Dropped with a debug log while offline.
    pub(crate) fn send(&self, message: ClientMessage) {
        if self.cmd_tx.send(ConnCmd::Send { message }).is_err() {
            log::debug!("[realtime-link] Connection task gone, frame dropped");
        }
    }
}

/// Why the live loop returned.
enum LiveExit {
    Lost(DisconnectReason),
    Disconnect,
    Shutdown,
}

/// Result of one open attempt.
enum Attempt {
    Opened(Box<dyn TransportLink>),
    Failed(LinkError),
    Disconnect,
    Shutdown,
}

struct ConnectionTask {
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    timeouts: LinkTimeouts,
    shared: Arc<Shared>,
    inbound_tx: mpsc::UnboundedSender<ServerMessage>,
    /// `connect()` callers waiting on the current attempt.
    waiters: Vec<oneshot::Sender<Result<()>>>,
    reconnect: ReconnectState,
    /// A live link dropped unexpectedly and automatic reconnection is running.
    recovering: bool,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut link: Option<Box<dyn TransportLink>> = None;

        loop {
            if let Some(mut live) = link.take() {
                let exit = self.drive_live(live.as_mut()).await;
                live.close().await;
                match exit {
                    LiveExit::Lost(reason) => {
                        log::warn!("[realtime-link] Connection lost: {}", reason);
                        self.shared.event_handlers.emit_disconnect(reason);
                        self.shared.set_state(ConnectionState::Disconnected);
                        if self.options.auto_reconnect {
                            self.reconnect.reset();
                            self.recovering = true;
                        }
                    },
                    LiveExit::Disconnect => {
                        self.close_intentionally();
                    },
                    LiveExit::Shutdown => {
                        self.close_intentionally();
                        return;
                    },
                }
                continue;
            }

            if self.recovering {
                match self.recover().await {
                    Some(Some(opened)) => link = Some(opened),
                    Some(None) => {},
                    None => return,
                }
                continue;
            }

            // Offline and idle: wait for an explicit connect.
            match self.cmd_rx.recv().await {
                Some(ConnCmd::Connect { result_tx }) => {
                    self.waiters.push(result_tx);
                    self.reconnect.reset();
                    self.publish_reconnect();
                    match self.attempt().await {
                        Attempt::Opened(opened) => {
                            self.on_connected();
                            link = Some(opened);
                        },
                        Attempt::Failed(e) => {
                            log::warn!("[realtime-link] Connect failed: {}", e);
                            self.shared
                                .event_handlers
                                .emit_error(ConnectionError::new(e.to_string(), e.is_retryable()));
                            self.shared.set_state(ConnectionState::Disconnected);
                            self.resolve_waiters(Err(e));
                        },
                        Attempt::Disconnect => self.close_intentionally(),
                        Attempt::Shutdown => {
                            self.close_intentionally();
                            return;
                        },
                    }
                },
                Some(ConnCmd::Send { message }) => {
                    log::debug!(
                        "[realtime-link] Offline, dropping {} frame",
                        message.kind()
                    );
                },
                Some(ConnCmd::Disconnect) => self.close_intentionally(),
                Some(ConnCmd::Shutdown) | None => return,
            }
        }
    }

    /// One backoff-then-attempt step of automatic reconnection.
    ///
    /// `None` means shutdown; `Some(None)` means keep looping without a link.
    async fn recover(&mut self) -> Option<Option<Box<dyn TransportLink>>> {
        let Some(delay_ms) = self
            .reconnect
            .advance(self.options.reconnect_delay_ms, self.options.max_reconnect_delay_ms)
        else {
            let attempts = self.reconnect.attempts;
            log::warn!("[realtime-link] Max reconnection attempts ({}) reached", attempts);
            self.recovering = false;
            self.shared.set_state(ConnectionState::ReconnectExhausted);
            self.shared.event_handlers.emit_error(ConnectionError::new(
                format!("Max reconnection attempts ({}) reached", attempts),
                false,
            ));
            self.resolve_waiters(Err(LinkError::ReconnectExhausted { attempts }));
            return Some(None);
        };
        self.publish_reconnect();

        log::info!(
            "[realtime-link] Attempting reconnection in {}ms (attempt {}/{})",
            delay_ms,
            self.reconnect.attempts,
            self.reconnect.max_attempts
        );

        // Sleep, but keep serving commands. An explicit connect() skips the
        // rest of the delay.
        let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Connect { result_tx }) => {
                        self.waiters.push(result_tx);
                        break;
                    },
                    Some(ConnCmd::Send { message }) => {
                        log::debug!(
                            "[realtime-link] Reconnecting, dropping {} frame",
                            message.kind()
                        );
                    },
                    Some(ConnCmd::Disconnect) => {
                        self.close_intentionally();
                        return Some(None);
                    },
                    Some(ConnCmd::Shutdown) | None => {
                        self.close_intentionally();
                        return None;
                    },
                },
                _ = &mut sleep => break,
            }
        }

        match self.attempt().await {
            Attempt::Opened(opened) => {
                log::info!("[realtime-link] Reconnection successful");
                self.on_connected();
                Some(Some(opened))
            },
            Attempt::Failed(e) => {
                log::warn!(
                    "[realtime-link] Reconnection attempt {} failed: {}",
                    self.reconnect.attempts,
                    e
                );
                self.shared.set_state(ConnectionState::Disconnected);
                Some(None)
            },
            Attempt::Disconnect => {
                self.close_intentionally();
                Some(None)
            },
            Attempt::Shutdown => {
                self.close_intentionally();
                None
            },
        }
    }

    /// Open a link, bounded by `connection_timeout`, while still serving
    /// commands. Concurrent `connect()` calls join this attempt.
    async fn attempt(&mut self) -> Attempt {
        self.shared.set_state(ConnectionState::Connecting);

        let transport = self.transport.clone();
        let limit = self.timeouts.connection_timeout;
        let open = async move { bounded(limit, transport.open()).await };
        tokio::pin!(open);

        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Connect { result_tx }) => self.waiters.push(result_tx),
                    Some(ConnCmd::Send { message }) => {
                        log::debug!(
                            "[realtime-link] Connecting, dropping {} frame",
                            message.kind()
                        );
                    },
                    Some(ConnCmd::Disconnect) => return Attempt::Disconnect,
                    Some(ConnCmd::Shutdown) | None => return Attempt::Shutdown,
                },
                opened = &mut open => {
                    return match opened {
                        Some(Ok(link)) => Attempt::Opened(link),
                        Some(Err(e)) => Attempt::Failed(e),
                        None => Attempt::Failed(LinkError::ConnectionTimeout(format!(
                            "transport did not open within {:?}",
                            limit
                        ))),
                    };
                }
            }
        }
    }

    /// Serve a live link until it drops or the caller closes it.
    async fn drive_live(&mut self, link: &mut dyn TransportLink) -> LiveExit {
        let has_keepalive = !self.timeouts.keepalive_interval.is_zero();
        let keepalive_dur = if has_keepalive {
            self.timeouts.keepalive_interval
        } else {
            FAR_FUTURE
        };
        let pong_timeout = self.timeouts.pong_timeout;
        let has_pong_timeout = has_keepalive && !pong_timeout.is_zero();

        let mut idle_deadline = TokioInstant::now() + keepalive_dur;
        let mut awaiting_pong = false;
        let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

        loop {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);
            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            tokio::select! {
                biased;

                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    log::warn!(
                        "[realtime-link] Pong timeout ({:?}), treating connection as dead",
                        pong_timeout
                    );
                    return LiveExit::Lost(DisconnectReason::new(format!(
                        "Pong timeout ({:?}), server unresponsive",
                        pong_timeout
                    )));
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Connect { result_tx }) => {
                        let _ = result_tx.send(Ok(()));
                    },
                    Some(ConnCmd::Send { message }) => {
                        if let Err(e) = self.write(link, &message).await {
                            return self.write_failed(e);
                        }
                    },
                    Some(ConnCmd::Disconnect) => return LiveExit::Disconnect,
                    Some(ConnCmd::Shutdown) | None => return LiveExit::Shutdown,
                },

                _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                    log::debug!("[realtime-link] Keepalive: sending heartbeat");
                    if let Err(e) = self.write(link, &ClientMessage::Heartbeat).await {
                        return self.write_failed(e);
                    }
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + pong_timeout;
                    }
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                }

                inbound = link.recv() => {
                    // Any frame proves the link is alive.
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }

                    match inbound {
                        Ok(Inbound::Message { message, raw }) => {
                            self.shared.event_handlers.emit_receive(&raw);
                            self.forward(message);
                        },
                        Ok(Inbound::Closed(reason)) => return LiveExit::Lost(reason),
                        Err(e) => {
                            let msg = e.to_string();
                            self.shared
                                .event_handlers
                                .emit_error(ConnectionError::new(msg.clone(), true));
                            return LiveExit::Lost(DisconnectReason::new(msg));
                        },
                    }
                }
            }
        }
    }

    async fn write(&self, link: &mut dyn TransportLink, message: &ClientMessage) -> Result<()> {
        match bounded(self.timeouts.send_timeout, link.send(message)).await {
            Some(Ok(raw)) => {
                self.shared.event_handlers.emit_send(&raw);
                Ok(())
            },
            Some(Err(e)) => Err(e),
            None => Err(LinkError::WebSocketError(format!(
                "send timed out after {:?}",
                self.timeouts.send_timeout
            ))),
        }
    }

    fn write_failed(&self, e: LinkError) -> LiveExit {
        self.shared
            .event_handlers
            .emit_error(ConnectionError::new(e.to_string(), true));
        LiveExit::Lost(DisconnectReason::new(format!("Write failed: {}", e)))
    }

    fn forward(&self, message: ServerMessage) {
        match message {
            ServerMessage::HeartbeatAck => {},
            ServerMessage::Error { message } => {
                log::warn!("[realtime-link] Server error: {}", message);
                self.shared
                    .event_handlers
                    .emit_error(ConnectionError::new(message, true));
            },
            other => {
                if self.inbound_tx.send(other).is_err() {
                    log::debug!("[realtime-link] Router gone, inbound frame dropped");
                }
            },
        }
    }

    fn on_connected(&mut self) {
        self.recovering = false;
        self.reconnect.reset();
        self.publish_reconnect();
        self.shared.set_state(ConnectionState::Connected);
        self.shared.event_handlers.emit_connect();
        self.resolve_waiters(Ok(()));
    }

    /// Caller-initiated close: no reconnect, counter cleared.
    fn close_intentionally(&mut self) {
        let was_connected = self.shared.state.read().is_connected();
        self.recovering = false;
        self.reconnect.reset();
        self.publish_reconnect();
        self.resolve_waiters(Err(LinkError::Cancelled));
        self.shared.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.shared
                .event_handlers
                .emit_disconnect(DisconnectReason::with_code("Client disconnected", 1000));
        }
    }

    fn resolve_waiters(&mut self, result: Result<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn publish_reconnect(&self) {
        *self.shared.reconnect.write() = self.reconnect;
    }
}
