use serde::{Deserialize, Serialize};

/// Reconnection bookkeeping owned by the connection task.
///
/// Reset on every successful connect, advanced on every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectState {
    /// Attempts scheduled since the last successful connect.
    pub attempts: u32,
    /// Delay before the most recently scheduled attempt.
    pub delay_ms: u64,
    pub max_attempts: u32,
}

impl ReconnectState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            delay_ms: 0,
            max_attempts,
        }
    }

    /// Backoff before attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn delay_for_attempt(base_ms: u64, cap_ms: u64, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        base_ms.saturating_mul(factor).min(cap_ms)
    }

    /// Schedule the next attempt.
    ///
    /// Returns the delay to wait, or `None` once `max_attempts` attempts
    /// have already been scheduled.
    pub fn advance(&mut self, base_ms: u64, cap_ms: u64) -> Option<u64> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        self.delay_ms = Self::delay_for_attempt(base_ms, cap_ms, self.attempts);
        Some(self.delay_ms)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = 0;
    }
}
