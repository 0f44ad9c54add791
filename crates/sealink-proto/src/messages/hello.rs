use bytes::BufMut;

use super::FieldReader;
use crate::errors::Result;

/// HELLO_REQUEST / HELLO_RESPONSE body.
///
/// A response echoes the request's nonce so the sender can match it against
/// its pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hello {
    /// Per-endpoint hello number
    pub nonce: u32,
}

impl Hello {
    /// Encoded body size
    pub const SIZE: usize = 4;

    pub(crate) fn encode_body(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.nonce);
    }

    pub(crate) fn decode_body(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self { nonce: reader.u32("nonce")? })
    }
}
