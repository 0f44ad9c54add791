//! Fixed message header with zero-copy parsing.
//!
//! Every datagram starts with a 3-byte header: the message type tag followed
//! by the big-endian body length. The body length must account for every
//! remaining byte of the datagram; there is no padding and no trailer.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MessageType,
    errors::{ProtocolError, Result},
};

/// Largest UDP payload over IPv4 (65535 - 8 byte UDP header - 20 byte IP
/// header).
pub const MAX_MESSAGE_SIZE: usize = 65_507;

/// Fixed 3-byte message header (Big Endian)
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with `zerocopy` traits means any 3 bytes
/// form a valid header value. Semantic validation (known type, body length)
/// happens in [`MessageHeader::from_bytes`] before the body is touched.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    message_type: u8,
    length: [u8; 2],
}

impl MessageHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 3;

    /// Largest body that fits in one datagram
    pub const MAX_BODY_SIZE: usize = MAX_MESSAGE_SIZE - Self::SIZE;

    /// Create a header for a body of `body_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the body would not fit in a datagram.
    pub fn new(message_type: MessageType, body_len: usize) -> Result<Self> {
        if body_len > Self::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body_len,
                max: Self::MAX_BODY_SIZE,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let length = (body_len as u16).to_be_bytes();

        Ok(Self { message_type: message_type.to_u8(), length })
    }

    /// Parse the header from the front of a datagram (zero-copy).
    ///
    /// # Errors
    ///
    /// - `MessageTooShort` if fewer than 3 bytes are present
    /// - `UnknownMessageType` if the tag byte is not a known message
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let (header, _) = Self::ref_from_prefix(bytes).map_err(|_| {
            ProtocolError::MessageTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if MessageType::from_u8(header.message_type).is_none() {
            return Err(ProtocolError::UnknownMessageType(header.message_type));
        }

        Ok(header)
    }

    /// Message type carried by this header.
    ///
    /// Returns `None` only for headers that were not produced by
    /// [`MessageHeader::new`] or validated by [`MessageHeader::from_bytes`].
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Declared body length in bytes
    #[must_use]
    pub fn body_len(&self) -> usize {
        usize::from(u16::from_be_bytes(self.length))
    }

    /// Raw header bytes for writing to the wire
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

impl std::fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHeader")
            .field("message_type", &self.message_type())
            .field("body_len", &self.body_len())
            .finish()
    }
}
