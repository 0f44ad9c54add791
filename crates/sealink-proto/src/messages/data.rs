use bytes::{BufMut, Bytes};

use super::FieldReader;
use crate::{
    MessageHeader, MessageType,
    errors::{ProtocolError, Result},
};

/// Size of the Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// DATA body: session number, sequence number, ciphertext, tag.
///
/// The session and sequence numbers travel in clear and are bound to the
/// ciphertext as associated data (see [`DataMessage::associated_data`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Session the ciphertext was sealed under
    pub session_number: u32,
    /// Per-direction sequence number, strictly increasing
    pub sequence_number: u32,
    /// Encrypted payload (without the tag)
    pub ciphertext: Bytes,
    /// Poly1305 tag over the ciphertext and associated data
    pub tag: [u8; TAG_SIZE],
}

impl DataMessage {
    const FIXED_SIZE: usize = 4 + 4 + TAG_SIZE;

    /// Largest plaintext that still fits in one datagram
    pub const MAX_PLAINTEXT: usize = MessageHeader::MAX_BODY_SIZE - Self::FIXED_SIZE;

    /// Associated data authenticated alongside the ciphertext: the type tag,
    /// session number and sequence number.
    #[must_use]
    pub fn associated_data(session_number: u32, sequence_number: u32) -> [u8; 9] {
        let mut ad = [0u8; 9];
        ad[0] = MessageType::Data.to_u8();
        ad[1..5].copy_from_slice(&session_number.to_be_bytes());
        ad[5..9].copy_from_slice(&sequence_number.to_be_bytes());
        ad
    }

    pub(crate) fn body_len(&self) -> usize {
        Self::FIXED_SIZE + self.ciphertext.len()
    }

    pub(crate) fn encode_body(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.session_number);
        dst.put_u32(self.sequence_number);
        dst.put_slice(&self.ciphertext);
        dst.put_slice(&self.tag);
    }

    pub(crate) fn decode_body(reader: &mut FieldReader<'_>) -> Result<Self> {
        let session_number = reader.u32("session_number")?;
        let sequence_number = reader.u32("sequence_number")?;

        let ciphertext_len = reader.remaining().checked_sub(TAG_SIZE).ok_or(
            ProtocolError::FieldTruncated {
                field: "tag",
                expected: TAG_SIZE,
                actual: reader.remaining(),
            },
        )?;
        let ciphertext = Bytes::copy_from_slice(reader.take(ciphertext_len, "ciphertext")?);
        let tag = reader.take_array("tag")?;

        Ok(Self { session_number, sequence_number, ciphertext, tag })
    }
}
