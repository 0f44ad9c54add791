//! X.509 certificates carried in PRESENTATION messages.
//!
//! Peers authenticate each other with self-signed (or CA-issued) X.509
//! certificates wrapping an Ed25519 key. The wire format only ever needs
//! three things from a certificate: its DER bytes, its Ed25519 public key and
//! a stable fingerprint for "have I seen exactly this certificate before".

use std::fmt;

use bytes::Bytes;
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::errors::{ProtocolError, Result};

/// Size of an Ed25519 signature on the wire
pub const SIGNATURE_SIZE: usize = 64;

/// A parsed X.509 certificate with an Ed25519 subject key.
///
/// Equality and hashing are defined over the DER encoding, so two
/// certificates are equal only when they are byte-identical.
#[derive(Clone)]
pub struct Certificate {
    der: Bytes,
    verifying_key: VerifyingKey,
}

impl Certificate {
    /// Parse a DER-encoded certificate and extract its Ed25519 key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCertificate` if:
    /// - The DER cannot be parsed as X.509
    /// - The subject key algorithm is not Ed25519 (OID 1.3.101.112)
    /// - The key is not a valid 32-byte Ed25519 point
    pub fn from_der(der: impl Into<Bytes>) -> Result<Self> {
        let der = der.into();
        let verifying_key = extract_ed25519_key(&der)?;
        Ok(Self { der, verifying_key })
    }

    /// DER encoding as received or generated
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Raw 32-byte Ed25519 public key
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// SHA-256 over the DER encoding
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.der).into()
    }

    /// Subject distinguished name, e.g. `CN=alice`.
    ///
    /// Returns `None` if the subject is empty.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        let (_, cert) = X509Certificate::from_der(&self.der).ok()?;
        let subject = cert.subject().to_string();
        (!subject.is_empty()).then_some(subject)
    }

    /// Verify an Ed25519 signature made by this certificate's key.
    ///
    /// Uses strict verification, rejecting malleable and small-order
    /// signatures.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the signature does not verify.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Result<()> {
        let signature = Signature::from_bytes(signature);
        self.verifying_key
            .verify_strict(message, &signature)
            .map_err(|_| ProtocolError::InvalidSignature)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl std::hash::Hash for Certificate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fingerprint = self.fingerprint();
        f.debug_struct("Certificate")
            .field("subject", &self.subject())
            .field("fingerprint", &format_args!("{}", short_hex(&fingerprint)))
            .field("der_len", &self.der.len())
            .finish()
    }
}

fn short_hex(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

fn extract_ed25519_key(der: &[u8]) -> Result<VerifyingKey> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| ProtocolError::InvalidCertificate(format!("X.509 parse error: {e}")))?;

    let spki = cert.public_key();
    if spki.algorithm.algorithm != oid_registry::OID_SIG_ED25519 {
        return Err(ProtocolError::InvalidCertificate(format!(
            "expected Ed25519 key (1.3.101.112), got {}",
            spki.algorithm.algorithm
        )));
    }

    // For Ed25519 the BIT STRING content is the raw 32-byte key.
    let raw: [u8; 32] = spki.subject_public_key.as_ref().try_into().map_err(|_| {
        ProtocolError::InvalidCertificate(format!(
            "expected 32-byte Ed25519 key, got {} bytes",
            spki.subject_public_key.as_ref().len()
        ))
    })?;

    VerifyingKey::from_bytes(&raw)
        .map_err(|e| ProtocolError::InvalidCertificate(format!("bad Ed25519 point: {e}")))
}
