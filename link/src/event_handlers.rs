//! Connection lifecycle event handlers.
//!
//! Callback hooks for monitoring the shared connection:
//!
//! - [`on_state_change`](EventHandlers::on_state_change): every state transition
//! - [`on_connect`](EventHandlers::on_connect): the link is live (first connect or recovery)
//! - [`on_disconnect`](EventHandlers::on_disconnect): the link closed, intentionally or not
//! - [`on_error`](EventHandlers::on_error): connection or protocol errors
//! - [`on_receive`](EventHandlers::on_receive) / [`on_send`](EventHandlers::on_send):
//!   debug hooks for raw frames
//!
//! # Example
//!
//! ```rust
//! use realtime_link::{ConnectionState, EventHandlers};
//!
//! let handlers = EventHandlers::new()
//!     .on_state_change(|state| {
//!         if state == ConnectionState::ReconnectExhausted {
//!             println!("offline: tap to reconnect");
//!         }
//!     })
//!     .on_error(|error| eprintln!("connection error: {}", error));
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::models::ConnectionState;

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether auto-reconnect (or a plain retry) may fix this.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type OnStateChangeCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers run synchronously on the connection
/// task, so they should return quickly.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_state_change: Option<OnStateChangeCallback>,
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked on every connection state transition.
    pub fn on_state_change(mut self, f: impl Fn(ConnectionState) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the connection becomes live.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the connection closes.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection error occurs.
    ///
    /// # Example
    /// ```rust
    /// use realtime_link::EventHandlers;
    ///
    /// let handlers = EventHandlers::new()
    ///     .on_error(|err| eprintln!("Error (recoverable={}): {}", err.recoverable, err));
    /// ```
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving every raw inbound frame.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving every raw outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_state_change.is_some()
            || self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_receive.is_some()
            || self.on_send.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    //
    // Hooks run on the connection task; a panicking hook is logged and
    // swallowed so it cannot take the connection down with it.
    // ---------------------------------------------------------------

    pub(crate) fn emit_state_change(&self, state: ConnectionState) {
        if let Some(cb) = &self.on_state_change {
            guarded("on_state_change", || cb(state));
        }
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            guarded("on_connect", || cb());
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            guarded("on_disconnect", || cb(reason));
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            guarded("on_error", || cb(error));
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            guarded("on_receive", || cb(raw));
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            guarded("on_send", || cb(raw));
        }
    }
}

fn guarded(hook: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::warn!("[realtime-link] {} handler panicked", hook);
    }
}
