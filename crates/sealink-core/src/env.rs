//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples the protocol engine from system
//! resources (time and randomness). The same engine code runs:
//!
//! - Under simulation: turmoil provides a virtual clock and the harness
//!   provides a seeded RNG, so any failing run replays bit-for-bit.
//!
//! - In production: [`SystemEnv`] uses the real clock and the OS entropy
//!   pool.
//!
//! # Rules for Protocol Code
//!
//! Handshake logic in this crate:
//!
//! - MUST NOT call `std::time::Instant::now()` directly; time is passed in
//! - MUST NOT draw entropy from anywhere but [`Environment::random_bytes`]
//!
//! Ephemeral X25519 secrets are drawn through the environment, which is why a
//! seeded simulation produces identical session keys on every run.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` never goes backwards
//! - Determinism: given the same seed, `random_bytes()` produces the same
//!   sequence

use std::time::{Duration, Instant};

use rand::{RngCore, rngs::OsRng};

/// Abstract environment providing time, randomness and sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current time.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (the engine's retry timers) sleeps. Handshake logic
    /// never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Key material is derived from this output. Production implementations
    /// MUST use the OS entropy pool.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u32`.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    /// Generates 32 random bytes, e.g. for an X25519 secret.
    fn random_key(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.random_bytes(&mut bytes);
        bytes
    }
}

/// Production environment: system clock, tokio timers and `OsRng`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_random_bytes_differ() {
        let env = SystemEnv;
        assert_ne!(env.random_key(), env.random_key());
    }

    #[tokio::test(start_paused = true)]
    async fn system_env_sleep_advances_time() {
        let env = SystemEnv;
        let before = tokio::time::Instant::now();
        env.sleep(Duration::from_secs(3)).await;
        assert!(tokio::time::Instant::now() - before >= Duration::from_secs(3));
    }
}
