use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Connection-level options for the shared realtime connection.
///
/// Reconnection constants are policy, not mechanism: every value here can be
/// overridden by the host application (builders or any serde source).
///
/// # Example
///
/// ```rust
/// use realtime_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_reconnect_delay_ms(500)
///     .with_max_reconnect_delay_ms(8_000)
///     .with_max_reconnect_attempts(5)
///     .with_max_channels(32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Reconnect automatically after an unexpected close of a live connection.
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Base delay before the first reconnect attempt, doubled per attempt.
    /// Default: 1000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Cap on the exponential backoff delay.
    /// Default: 30000ms
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Attempts before giving up with `ReconnectExhausted`.
    /// Default: 5. Set to 0 to never reconnect automatically.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Maximum number of concurrently open channels.
    /// Default: 100
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Bearer token sent with the transport handshake, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_channels() -> usize {
    100
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_channels: default_max_channels(),
            auth_token: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, max_attempts: u32) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = max_channels;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Reject option combinations the reconnect policy cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(LinkError::ConfigurationError(
                "reconnect_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(LinkError::ConfigurationError(format!(
                "max_reconnect_delay_ms ({}) is below reconnect_delay_ms ({})",
                self.max_reconnect_delay_ms, self.reconnect_delay_ms
            )));
        }
        if self.max_channels == 0 {
            return Err(LinkError::ConfigurationError(
                "max_channels must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
