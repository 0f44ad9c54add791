//! Error types for the Sealink wire format.
//!
//! All errors are structured so tests can match on the exact failure.

use thiserror::Error;

/// Errors produced while encoding or decoding a datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram is shorter than the fixed message header
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort {
        /// Minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Leading type byte does not name a known message
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Header length disagrees with the datagram length
    #[error("length mismatch: header declares {declared} body bytes, datagram carries {actual}")]
    LengthMismatch {
        /// Body length claimed by the header
        declared: usize,
        /// Body bytes actually present
        actual: usize,
    },

    /// A field runs past the end of the body
    #[error("field `{field}` truncated: needs {expected} bytes, {actual} remain")]
    FieldTruncated {
        /// Name of the field being read
        field: &'static str,
        /// Bytes the field needs
        expected: usize,
        /// Bytes left in the body
        actual: usize,
    },

    /// Body has bytes after the last field
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    /// Encoded message would not fit in one datagram
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Size that was attempted
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Cipher suite byte is not supported
    #[error("unsupported cipher suite: {0:#04x}")]
    UnsupportedCipherSuite(u8),

    /// Certificate could not be parsed or carries a non-Ed25519 key
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Embedded signature does not verify against the claimed certificate
    #[error("signature verification failed")]
    InvalidSignature,
}

impl ProtocolError {
    /// Returns true for structural failures (everything except a bad
    /// signature).
    ///
    /// The engine reports these as malformed messages and the rest as
    /// authentication failures.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::InvalidSignature)
    }
}

/// Convenient Result type alias for wire-format operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
