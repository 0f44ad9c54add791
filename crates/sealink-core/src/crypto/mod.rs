//! Cryptographic building blocks for sessions.
//!
//! - [`x25519`]: ephemeral key pairs and Diffie-Hellman with low-order
//!   rejection
//! - [`kdf`]: HKDF-SHA256 derivation of per-direction session keys
//! - [`aead`]: ChaCha20-Poly1305 sealing of DATA payloads
//!
//! All secret material is zeroized on drop.

pub mod aead;
pub mod kdf;
pub mod x25519;

pub use kdf::SessionKeys;
pub use x25519::{EphemeralKeyPair, SharedSecret};
