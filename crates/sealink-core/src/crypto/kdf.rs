//! Session key derivation.
//!
//! Each direction gets its own key so the two peers never encrypt under the
//! same (key, nonce) pair even though both count sequence numbers from 1:
//!
//! ```text
//! prk      = HKDF-Extract(salt = "sealink session" || session_number, dh)
//! key(a→b) = HKDF-Expand(prk, "sealink v1 key" || pk_a || pk_b, 32)
//! ```
//!
//! `pk_a` is the sender's ephemeral public key, so the key one side sends with
//! is exactly the key the other side receives with.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::x25519::SharedSecret;
use crate::error::ChannelError;

const SALT_LABEL: &[u8] = b"sealink session";
const INFO_LABEL: &[u8] = b"sealink v1 key";

/// Symmetric keys for one session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for DATA we send
    pub(crate) local: [u8; 32],
    /// Key for DATA we receive
    pub(crate) remote: [u8; 32],
}

impl SessionKeys {
    /// Derive both direction keys from a DH output.
    ///
    /// # Errors
    ///
    /// Returns `KeyExchange` if HKDF refuses the output length.
    pub fn derive(
        shared: &SharedSecret,
        session_number: u32,
        local_public: &[u8; 32],
        remote_public: &[u8; 32],
    ) -> Result<Self, ChannelError> {
        let mut salt = [0u8; SALT_LABEL.len() + 4];
        salt[..SALT_LABEL.len()].copy_from_slice(SALT_LABEL);
        salt[SALT_LABEL.len()..].copy_from_slice(&session_number.to_be_bytes());

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        Ok(Self {
            local: expand(&hkdf, local_public, remote_public)?,
            remote: expand(&hkdf, remote_public, local_public)?,
        })
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys([REDACTED])")
    }
}

fn expand(
    hkdf: &Hkdf<Sha256>,
    sender: &[u8; 32],
    receiver: &[u8; 32],
) -> Result<[u8; 32], ChannelError> {
    let mut info = [0u8; INFO_LABEL.len() + 64];
    info[..INFO_LABEL.len()].copy_from_slice(INFO_LABEL);
    info[INFO_LABEL.len()..INFO_LABEL.len() + 32].copy_from_slice(sender);
    info[INFO_LABEL.len() + 32..].copy_from_slice(receiver);

    let mut key = [0u8; 32];
    hkdf.expand(&info, &mut key).map_err(|_| ChannelError::KeyExchange)?;
    Ok(key)
}
