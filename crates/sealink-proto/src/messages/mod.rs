//! Wire messages and the datagram codec.
//!
//! Every datagram is a [`MessageHeader`] followed by exactly
//! `header.body_len()` body bytes. [`Message::decode`] rejects anything else:
//! short buffers, unknown tags, length mismatches, truncated fields and
//! trailing garbage all map to a [`ProtocolError`] rather than a panic.

mod data;
mod hello;
mod presentation;
mod session;

use bytes::{BufMut, Bytes, BytesMut};
pub use data::{DataMessage, TAG_SIZE};
pub use hello::Hello;
pub use presentation::Presentation;
pub use session::SessionMessage;

use crate::{
    MessageHeader, MessageType,
    errors::{ProtocolError, Result},
};

/// A decoded datagram.
///
/// HELLO_REQUEST/HELLO_RESPONSE share a body layout, as do
/// SESSION_REQUEST/SESSION; the variant carries the distinction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Liveness check carrying a nonce
    HelloRequest(Hello),
    /// Probe answer echoing the request nonce
    HelloResponse(Hello),
    /// Signed certificate exchange
    Presentation(Presentation),
    /// Signed ephemeral key offer
    SessionRequest(SessionMessage),
    /// Signed ephemeral key answer
    Session(SessionMessage),
    /// Encrypted payload
    Data(DataMessage),
}

impl Message {
    /// Wire type tag of this message
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::HelloRequest(_) => MessageType::HelloRequest,
            Self::HelloResponse(_) => MessageType::HelloResponse,
            Self::Presentation(_) => MessageType::Presentation,
            Self::SessionRequest(_) => MessageType::SessionRequest,
            Self::Session(_) => MessageType::Session,
            Self::Data(_) => MessageType::Data,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::HelloRequest(_) | Self::HelloResponse(_) => Hello::SIZE,
            Self::Presentation(p) => p.body_len(),
            Self::SessionRequest(_) | Self::Session(_) => SessionMessage::SIZE,
            Self::Data(d) => d.body_len(),
        }
    }

    /// Total encoded size including the header
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MessageHeader::SIZE + self.body_len()
    }

    /// Encode the message into a buffer.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the certificates or ciphertext do not fit
    /// in a single datagram. Nothing is written in that case.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let header = MessageHeader::new(self.message_type(), self.body_len())?;
        dst.put_slice(&header.to_bytes());

        match self {
            Self::HelloRequest(h) | Self::HelloResponse(h) => h.encode_body(dst),
            Self::Presentation(p) => p.encode_body(dst),
            Self::SessionRequest(s) | Self::Session(s) => s.encode_body(dst),
            Self::Data(d) => d.encode_body(dst),
        }

        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// Same as [`Message::encode`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one datagram.
    ///
    /// PRESENTATION signatures are verified here against the embedded
    /// signature certificate. SESSION_REQUEST/SESSION signatures depend on the
    /// peer's earlier PRESENTATION and are verified by the caller through
    /// [`SessionMessage::verify`].
    ///
    /// # Errors
    ///
    /// - Structural problems map to the malformed variants of
    ///   [`ProtocolError`]
    /// - A PRESENTATION whose signature does not verify returns
    ///   `InvalidSignature`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = MessageHeader::from_bytes(bytes)?;
        let ty = header
            .message_type()
            .ok_or(ProtocolError::UnknownMessageType(bytes[0]))?;

        let body = &bytes[MessageHeader::SIZE..];
        if header.body_len() != body.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.body_len(),
                actual: body.len(),
            });
        }

        let mut reader = FieldReader::new(body);
        let message = match ty {
            MessageType::HelloRequest => Self::HelloRequest(Hello::decode_body(&mut reader)?),
            MessageType::HelloResponse => Self::HelloResponse(Hello::decode_body(&mut reader)?),
            MessageType::Presentation => {
                Self::Presentation(Presentation::decode_body(&mut reader)?)
            },
            MessageType::SessionRequest => {
                Self::SessionRequest(SessionMessage::decode_body(&mut reader)?)
            },
            MessageType::Session => Self::Session(SessionMessage::decode_body(&mut reader)?),
            MessageType::Data => Self::Data(DataMessage::decode_body(&mut reader)?),
        };
        reader.finish()?;

        Ok(message)
    }
}

/// Bounds-checked cursor over a message body.
pub(crate) struct FieldReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    /// Everything read so far
    pub(crate) fn consumed(&self) -> &'a [u8] {
        &self.body[..self.pos]
    }

    pub(crate) fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::FieldTruncated {
                field,
                expected: len,
                actual: self.remaining(),
            });
        }
        let out = &self.body[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub(crate) fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16> {
        self.take_array::<2>(field).map(u16::from_be_bytes)
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32> {
        self.take_array::<4>(field).map(u32::from_be_bytes)
    }

    pub(crate) fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes(extra)),
        }
    }
}
