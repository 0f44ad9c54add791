//! Message type tags and cipher suite identifiers.
//!
//! The type tag is the first byte of every datagram. Handshake messages use
//! the low range; DATA sits at `0x70` so a glance at a packet capture tells
//! control traffic from payload traffic.

/// Wire message kinds.
///
/// # Security
///
/// [`MessageType::from_u8`] returns `None` for unknown values. Datagrams
/// with an unknown tag are rejected with
/// [`ProtocolError::UnknownMessageType`](crate::ProtocolError::UnknownMessageType)
/// before any body byte is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Liveness check
    HelloRequest = 0x00,
    /// Probe answer echoing the nonce
    HelloResponse = 0x01,
    /// Certificate exchange
    Presentation = 0x02,
    /// Ephemeral key offer
    SessionRequest = 0x03,
    /// Ephemeral key answer
    Session = 0x04,
    /// Encrypted payload
    Data = 0x70,
}

impl MessageType {
    /// Convert to the wire byte
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from the wire byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::HelloRequest),
            0x01 => Some(Self::HelloResponse),
            0x02 => Some(Self::Presentation),
            0x03 => Some(Self::SessionRequest),
            0x04 => Some(Self::Session),
            0x70 => Some(Self::Data),
            _ => None,
        }
    }

    /// Human-readable name for logging
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::HelloRequest => "HELLO_REQUEST",
            Self::HelloResponse => "HELLO_RESPONSE",
            Self::Presentation => "PRESENTATION",
            Self::SessionRequest => "SESSION_REQUEST",
            Self::Session => "SESSION",
            Self::Data => "DATA",
        }
    }
}

/// Symmetric cipher negotiated in SESSION_REQUEST / SESSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CipherSuite {
    /// X25519 key agreement, HKDF-SHA256, ChaCha20-Poly1305
    #[default]
    X25519ChaCha20Poly1305 = 0x01,
}

impl CipherSuite {
    /// Convert to the wire byte
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from the wire byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::X25519ChaCha20Poly1305),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_bytes_match_wire_table() {
        assert_eq!(MessageType::HelloRequest.to_u8(), 0x00);
        assert_eq!(MessageType::HelloResponse.to_u8(), 0x01);
        assert_eq!(MessageType::Presentation.to_u8(), 0x02);
        assert_eq!(MessageType::SessionRequest.to_u8(), 0x03);
        assert_eq!(MessageType::Session.to_u8(), 0x04);
        assert_eq!(MessageType::Data.to_u8(), 0x70);
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        for byte in [0x05, 0x6f, 0x71, 0xff] {
            assert_eq!(MessageType::from_u8(byte), None);
        }
        assert_eq!(CipherSuite::from_u8(0x00), None);
        assert_eq!(CipherSuite::from_u8(0x02), None);
    }

    #[test]
    fn known_bytes_parse_back() {
        for ty in [
            MessageType::HelloRequest,
            MessageType::HelloResponse,
            MessageType::Presentation,
            MessageType::SessionRequest,
            MessageType::Session,
            MessageType::Data,
        ] {
            assert_eq!(MessageType::from_u8(ty.to_u8()), Some(ty));
        }
    }
}
