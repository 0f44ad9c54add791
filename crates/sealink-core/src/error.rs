//! Error types for the Sealink protocol engine.
//!
//! Inbound failures (malformed datagrams, bad signatures, replays) are logged
//! and dropped by the dispatch loop; they never reach the application.
//! Failures of application-initiated operations (`greet`, `send_data`, ...)
//! are returned to the caller as a [`ChannelError`].

use std::{fmt, io, time::Duration};

use sealink_proto::ProtocolError;

/// Errors produced by the handshake state machine and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Datagram failed structural validation
    MalformedMessage(ProtocolError),

    /// A signature did not verify against the peer's certificate
    InvalidSignature,

    /// No matching response before the retry budget ran out
    Timeout {
        /// How long we waited in total
        elapsed: Duration,
    },

    /// Session number is not newer than the one already established
    SessionRejected {
        /// Session number offered by the peer
        received: u32,
        /// Session number currently established
        current: u32,
    },

    /// DATA sequence number was already seen or is older than the window
    ReplayDetected {
        /// Sequence number received
        sequence: u32,
        /// Highest sequence number accepted so far
        highest: u32,
    },

    /// Underlying socket error
    Transport(String),

    /// Certificate or private key could not be loaded
    IdentityLoad(String),

    /// HELLO_RESPONSE with a nonce we are not waiting for
    UnmatchedResponse {
        /// Nonce carried by the response
        nonce: u32,
    },

    /// Peer has not presented a certificate we accepted
    UntrustedPeer,

    /// Operation needs an established session
    NoSession,

    /// DATA or SESSION names a session we do not hold
    UnknownSession {
        /// Session number carried by the message
        session_number: u32,
    },

    /// AEAD tag did not verify
    AuthenticationFailed,

    /// Key agreement produced a degenerate shared secret, or key derivation
    /// failed
    KeyExchange,

    /// Outbound sequence numbers are used up; renegotiate the session
    SequenceExhausted,

    /// Plaintext does not fit in one datagram
    PayloadTooLarge {
        /// Plaintext size
        size: usize,
        /// Largest plaintext accepted
        max: usize,
    },

    /// The engine was closed or the peer was forgotten
    Closed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage(err) => write!(f, "malformed message: {}", err),
            Self::InvalidSignature => write!(f, "invalid signature"),
            Self::Timeout { elapsed } => write!(f, "timeout after {:?}", elapsed),
            Self::SessionRejected { received, current } => {
                write!(f, "session {} rejected: session {} already established", received, current)
            },
            Self::ReplayDetected { sequence, highest } => {
                write!(f, "replay detected: sequence {} not above {}", sequence, highest)
            },
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::IdentityLoad(msg) => write!(f, "failed to load identity: {}", msg),
            Self::UnmatchedResponse { nonce } => {
                write!(f, "no pending request for nonce {}", nonce)
            },
            Self::UntrustedPeer => write!(f, "peer has not presented a trusted certificate"),
            Self::NoSession => write!(f, "no session established"),
            Self::UnknownSession { session_number } => {
                write!(f, "unknown session {}", session_number)
            },
            Self::AuthenticationFailed => write!(f, "message authentication failed"),
            Self::KeyExchange => write!(f, "key exchange failed"),
            Self::SequenceExhausted => write!(f, "sequence numbers exhausted"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload of {} bytes exceeds maximum {}", size, max)
            },
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl ChannelError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Timeouts and socket errors are transient. Authentication failures and
    /// protocol violations indicate a broken or malicious peer and are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

/// Signature failures are surfaced as their own kind; everything else the
/// codec rejects is malformed.
impl From<ProtocolError> for ChannelError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidSignature => Self::InvalidSignature,
            other => Self::MalformedMessage(other),
        }
    }
}

/// Convert io::Error to ChannelError (for transport errors)
impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
