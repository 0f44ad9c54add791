use bytes::BufMut;
use ed25519_dalek::{Signature, Signer};

use super::FieldReader;
use crate::{Certificate, MessageType, certificate::SIGNATURE_SIZE, errors::Result};

/// PRESENTATION body.
///
/// Layout (big endian):
///
/// ```text
/// u16 sig_len | sig_cert DER | u16 enc_len | enc_cert DER | signature[64]
/// ```
///
/// The signature is made with the signature certificate's key over the type
/// tag followed by every body byte before the signature.
///
/// # Security
///
/// [`Message::decode`](crate::Message::decode) verifies the signature before
/// returning a `Presentation`, so a value of this type always proves the
/// sender held the signature key at some point. It does NOT prove freshness;
/// trust decisions belong to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    /// Certificate whose key signs handshake messages
    pub signature_certificate: Certificate,
    /// Certificate identifying the encryption endpoint
    pub encryption_certificate: Certificate,
    /// Ed25519 signature over the type tag and the certificate fields
    pub signature: [u8; SIGNATURE_SIZE],
}

impl Presentation {
    /// Build and sign a presentation.
    ///
    /// `signer` must hold the private key of `signature_certificate`, or the
    /// receiver will reject the message.
    pub fn signed(
        signature_certificate: Certificate,
        encryption_certificate: Certificate,
        signer: &impl Signer<Signature>,
    ) -> Self {
        let payload = signed_payload(&signature_certificate, &encryption_certificate);
        let signature = signer.sign(&payload).to_bytes();
        Self { signature_certificate, encryption_certificate, signature }
    }

    pub(crate) fn body_len(&self) -> usize {
        2 + self.signature_certificate.der().len()
            + 2
            + self.encryption_certificate.der().len()
            + SIGNATURE_SIZE
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn encode_body(&self, dst: &mut impl BufMut) {
        // Header validation already bounded the body below u16::MAX.
        for cert in [&self.signature_certificate, &self.encryption_certificate] {
            dst.put_u16(cert.der().len() as u16);
            dst.put_slice(cert.der());
        }
        dst.put_slice(&self.signature);
    }

    pub(crate) fn decode_body(reader: &mut FieldReader<'_>) -> Result<Self> {
        let sig_len = usize::from(reader.u16("signature_certificate_len")?);
        let sig_der = reader.take(sig_len, "signature_certificate")?;
        let enc_len = usize::from(reader.u16("encryption_certificate_len")?);
        let enc_der = reader.take(enc_len, "encryption_certificate")?;
        let signed_body = reader.consumed();
        let signature: [u8; SIGNATURE_SIZE] = reader.take_array("signature")?;

        let signature_certificate = Certificate::from_der(sig_der.to_vec())?;
        let encryption_certificate = Certificate::from_der(enc_der.to_vec())?;

        let mut payload = Vec::with_capacity(1 + signed_body.len());
        payload.push(MessageType::Presentation.to_u8());
        payload.extend_from_slice(signed_body);
        signature_certificate.verify(&payload, &signature)?;

        Ok(Self { signature_certificate, encryption_certificate, signature })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn signed_payload(
    signature_certificate: &Certificate,
    encryption_certificate: &Certificate,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(
        1 + 4 + signature_certificate.der().len() + encryption_certificate.der().len(),
    );
    payload.push(MessageType::Presentation.to_u8());
    for cert in [signature_certificate, encryption_certificate] {
        payload.extend_from_slice(&(cert.der().len() as u16).to_be_bytes());
        payload.extend_from_slice(cert.der());
    }
    payload
}
