//! Error types for realtime-link.

use thiserror::Error;

/// Errors surfaced by the real-time client.
///
/// The first five variants are the connection/subscription taxonomy; the rest
/// wrap transport and programming errors.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// `connect()` did not get a confirmed link within the connection timeout.
    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// Automatic reconnection gave up. Terminal until the caller retries `connect()`.
    #[error("Reconnect exhausted after {attempts} attempt(s)")]
    ReconnectExhausted { attempts: u32 },

    /// Malformed channel key or channel quota exceeded.
    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    /// Best-effort payload enrichment failed. Never fatal.
    #[error("Enrichment failed: {0}")]
    EnrichmentFailed(String),

    /// An outbound write collaborator failed; the optimistic entry was rolled back.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// The operation was aborted by `disconnect()` or shutdown.
    #[error("Operation cancelled")]
    Cancelled,
}

impl LinkError {
    /// Whether retrying the same call without changing it may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::ConnectionTimeout(_)
                | LinkError::ReconnectExhausted { .. }
                | LinkError::WebSocketError(_)
                | LinkError::WriteFailed(_)
        )
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::SerializationError(e.to_string())
    }
}

/// Result type for realtime-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
