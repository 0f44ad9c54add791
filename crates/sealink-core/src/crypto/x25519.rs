//! Ephemeral X25519 key agreement.

use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{env::Environment, error::ChannelError};

/// A shared secret resulting from a Diffie-Hellman operation.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

impl SharedSecret {
    /// Access the raw 32-byte shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// One side's ephemeral key pair for a single session negotiation.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: [u8; 32],
}

impl EphemeralKeyPair {
    /// Draw a fresh secret from the environment's RNG.
    pub fn generate(env: &impl Environment) -> Self {
        let mut bytes = env.random_key();
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Public half, sent in SESSION_REQUEST / SESSION
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Diffie-Hellman with the peer's public key.
    ///
    /// # Errors
    ///
    /// Returns `KeyExchange` if the result is the all-zeros point, which a
    /// low-order peer key produces (RFC 7748 Section 6.1).
    pub fn agree(&self, remote_public: &[u8; 32]) -> Result<SharedSecret, ChannelError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));
        if bool::from(shared.as_bytes().ct_eq(&[0u8; 32])) {
            return Err(ChannelError::KeyExchange);
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
