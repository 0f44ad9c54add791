//! Engine configuration.

use std::time::Duration;

use sealink_proto::MAX_MESSAGE_SIZE;

/// Backoff between HELLO retransmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Every attempt waits `hello_timeout`
    Fixed,
    /// Attempt `n` waits `hello_timeout * 2^n`, capped at `max`
    Exponential {
        /// Upper bound for a single attempt
        max: Duration,
    },
}

impl RetryPolicy {
    /// How long attempt `attempt` (0-based) waits for a response.
    #[must_use]
    pub fn attempt_timeout(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base,
            Self::Exponential { max } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(*max)
            },
        }
    }

    /// Sum of every attempt's timeout.
    #[must_use]
    pub fn total_timeout(&self, base: Duration, attempts: u32) -> Duration {
        (0..attempts).map(|n| self.attempt_timeout(base, n)).fold(Duration::ZERO, |a, b| a + b)
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Receive/dispatch workers sharing the socket
    pub workers: usize,
    /// Base time to wait for a HELLO_RESPONSE
    pub hello_timeout: Duration,
    /// HELLO_REQUEST transmissions before giving up (at least 1)
    pub hello_attempts: u32,
    /// Backoff between attempts
    pub retry_policy: RetryPolicy,
    /// Value passed as `default_accept` to the hello callback
    pub accept_hello_by_default: bool,
    /// Send a PRESENTATION after every successful greet
    pub introduce_after_greet: bool,
    /// Receive buffer size; larger datagrams are truncated and dropped
    pub max_datagram_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            hello_timeout: Duration::from_secs(3),
            hello_attempts: 3,
            retry_policy: RetryPolicy::Fixed,
            accept_hello_by_default: true,
            introduce_after_greet: true,
            max_datagram_size: MAX_MESSAGE_SIZE,
        }
    }
}
