//! Timeout configuration for real-time client operations.
//!
//! Centralizes every bounded wait in the crate: establishing the shared
//! connection, writing frames, and the best-effort fetches the event router
//! performs before dispatch.

use std::time::Duration;

/// Timeout configuration for real-time client operations.
///
/// # Examples
///
/// ```rust
/// use realtime_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = LinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = LinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .enrichment_timeout(Duration::from_secs(10))
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = LinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Timeout for opening the transport and getting it confirmed.
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for writing a single frame to the transport.
    /// Default: 10 seconds
    pub send_timeout: Duration,

    /// Timeout for the single enrichment fetch performed per event.
    /// Default: 5 seconds
    pub enrichment_timeout: Duration,

    /// Timeout for a relevance lookup (e.g. conversation participants).
    /// Default: 5 seconds
    pub relevance_timeout: Duration,

    /// Idle interval after which a heartbeat is sent on the live connection.
    /// Set to 0 to disable keepalive.
    /// Default: 25 seconds
    pub keepalive_interval: Duration,

    /// Maximum time to wait for any frame after a heartbeat before the
    /// connection is considered dead. Set to 0 to disable.
    /// Default: 10 seconds
    pub pong_timeout: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            enrichment_timeout: Duration::from_secs(5),
            relevance_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Shorter timeouts suitable for localhost connections.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            enrichment_timeout: Duration::from_secs(1),
            relevance_timeout: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Run `fut` bounded by `limit`, unless `limit` means "no timeout".
pub(crate) async fn bounded<F, T>(limit: Duration, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    if LinkTimeouts::is_no_timeout(limit) {
        Some(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

/// Builder for creating custom [`LinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the connection timeout in seconds.
    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    /// Set the send timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    /// Set the enrichment fetch timeout.
    pub fn enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.enrichment_timeout = timeout;
        self
    }

    /// Set the relevance lookup timeout.
    pub fn relevance_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.relevance_timeout = timeout;
        self
    }

    /// Set the keepalive heartbeat interval (0 disables keepalive).
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the heartbeat reply timeout (0 disables the check).
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = LinkTimeouts::default();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.enrichment_timeout, Duration::from_secs(5));
        assert_eq!(timeouts.pong_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_overrides() {
        let timeouts = LinkTimeouts::builder()
            .connection_timeout_secs(3)
            .keepalive_interval(Duration::ZERO)
            .build();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(3));
        assert!(timeouts.keepalive_interval.is_zero());
        assert_eq!(timeouts.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_is_no_timeout() {
        assert!(LinkTimeouts::is_no_timeout(Duration::ZERO));
        assert!(LinkTimeouts::is_no_timeout(Duration::from_secs(86400 * 400)));
        assert!(!LinkTimeouts::is_no_timeout(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_expires() {
        let result = bounded(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_none());

        let result = bounded(Duration::ZERO, async { 7 }).await;
        assert_eq!(result, Some(7));
    }
}
