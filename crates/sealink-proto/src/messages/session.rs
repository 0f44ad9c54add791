use bytes::BufMut;
use ed25519_dalek::{Signature, Signer};

use super::FieldReader;
use crate::{
    Certificate, CipherSuite, MessageType,
    certificate::SIGNATURE_SIZE,
    errors::{ProtocolError, Result},
};

/// SESSION_REQUEST / SESSION body.
///
/// Carries the sender's ephemeral X25519 public key for one session number.
/// The signature covers the type tag, session number, cipher suite and
/// public key, and is made with the key of the sender's presented signature
/// certificate.
///
/// # Security
///
/// Decoding does not verify the signature: the verifying key comes from the
/// peer's earlier PRESENTATION, which the codec does not know about. Callers
/// MUST call [`SessionMessage::verify`] before using the public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    /// Key agreement generation; a higher number replaces a lower one
    pub session_number: u32,
    /// Negotiated cipher suite
    pub cipher_suite: CipherSuite,
    /// Sender's ephemeral X25519 public key
    pub public_key: [u8; 32],
    /// Ed25519 signature over [`SessionMessage::signed_payload`]
    pub signature: [u8; SIGNATURE_SIZE],
}

impl SessionMessage {
    /// Encoded body size
    pub const SIZE: usize = 4 + 1 + 32 + SIGNATURE_SIZE;

    /// Build and sign a session message.
    ///
    /// `message_type` is bound into the signature, so a SESSION_REQUEST can
    /// never be replayed as a SESSION and vice versa.
    pub fn signed(
        message_type: MessageType,
        session_number: u32,
        cipher_suite: CipherSuite,
        public_key: [u8; 32],
        signer: &impl Signer<Signature>,
    ) -> Self {
        let payload =
            Self::signed_payload(message_type, session_number, cipher_suite, &public_key);
        let signature = signer.sign(&payload).to_bytes();
        Self { session_number, cipher_suite, public_key, signature }
    }

    /// Bytes covered by the signature
    #[must_use]
    pub fn signed_payload(
        message_type: MessageType,
        session_number: u32,
        cipher_suite: CipherSuite,
        public_key: &[u8; 32],
    ) -> [u8; 38] {
        let mut out = [0u8; 38];
        out[0] = message_type.to_u8();
        out[1..5].copy_from_slice(&session_number.to_be_bytes());
        out[5] = cipher_suite.to_u8();
        out[6..].copy_from_slice(public_key);
        out
    }

    /// Verify the signature against the peer's signature certificate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the signature was not made by
    /// `certificate`'s key over this message as `message_type`.
    pub fn verify(&self, message_type: MessageType, certificate: &Certificate) -> Result<()> {
        let payload = Self::signed_payload(
            message_type,
            self.session_number,
            self.cipher_suite,
            &self.public_key,
        );
        certificate.verify(&payload, &self.signature)
    }

    pub(crate) fn encode_body(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.session_number);
        dst.put_u8(self.cipher_suite.to_u8());
        dst.put_slice(&self.public_key);
        dst.put_slice(&self.signature);
    }

    pub(crate) fn decode_body(reader: &mut FieldReader<'_>) -> Result<Self> {
        let session_number = reader.u32("session_number")?;
        let [suite] = reader.take_array::<1>("cipher_suite")?;
        let cipher_suite =
            CipherSuite::from_u8(suite).ok_or(ProtocolError::UnsupportedCipherSuite(suite))?;
        let public_key = reader.take_array("public_key")?;
        let signature = reader.take_array("signature")?;

        Ok(Self { session_number, cipher_suite, public_key, signature })
    }
}
