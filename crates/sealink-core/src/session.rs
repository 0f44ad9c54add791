//! Established sessions and in-flight session negotiations.
//!
//! # Invariants
//!
//! - Outbound sequence numbers start at 1 and strictly increase; a session
//!   never seals two messages with the same number.
//! - Inbound sequence numbers must strictly increase. The replay window is
//!   advanced only after the tag verifies, so a forged datagram cannot push
//!   it forward.

use bytes::Bytes;
use sealink_proto::{CipherSuite, DataMessage, SessionMessage};

use crate::{
    crypto::{EphemeralKeyPair, SessionKeys, aead},
    error::ChannelError,
};

/// Tracks the highest authenticated inbound sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayWindow {
    highest: Option<u32>,
}

impl ReplayWindow {
    /// Highest sequence number accepted so far
    #[must_use]
    pub fn highest(&self) -> Option<u32> {
        self.highest
    }

    /// Check that `sequence` is above everything accepted so far.
    ///
    /// # Errors
    ///
    /// Returns `ReplayDetected` otherwise.
    pub fn check(&self, sequence: u32) -> Result<(), ChannelError> {
        match self.highest {
            Some(highest) if sequence <= highest => {
                Err(ChannelError::ReplayDetected { sequence, highest })
            },
            _ => Ok(()),
        }
    }

    /// Record an authenticated sequence number.
    pub fn accept(&mut self, sequence: u32) {
        self.highest = Some(self.highest.map_or(sequence, |h| h.max(sequence)));
    }
}

/// Symmetric state for one established session.
#[derive(Debug)]
pub struct Session {
    session_number: u32,
    cipher_suite: CipherSuite,
    keys: SessionKeys,
    next_sequence: u64,
    replay: ReplayWindow,
}

impl Session {
    /// Create a session with fresh counters.
    #[must_use]
    pub fn new(session_number: u32, cipher_suite: CipherSuite, keys: SessionKeys) -> Self {
        Self {
            session_number,
            cipher_suite,
            keys,
            next_sequence: 1,
            replay: ReplayWindow::default(),
        }
    }

    /// Agreed session number
    #[must_use]
    pub fn session_number(&self) -> u32 {
        self.session_number
    }

    /// Negotiated cipher suite
    #[must_use]
    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    /// Inbound replay state
    #[must_use]
    pub fn replay_window(&self) -> ReplayWindow {
        self.replay
    }

    /// Encrypt `plaintext` under the next outbound sequence number.
    ///
    /// # Errors
    ///
    /// - `SequenceExhausted` once all 2^32 - 1 sequence numbers are used
    /// - `PayloadTooLarge` if the result would not fit in one datagram
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<DataMessage, ChannelError> {
        if plaintext.len() > DataMessage::MAX_PLAINTEXT {
            return Err(ChannelError::PayloadTooLarge {
                size: plaintext.len(),
                max: DataMessage::MAX_PLAINTEXT,
            });
        }
        let sequence_number =
            u32::try_from(self.next_sequence).map_err(|_| ChannelError::SequenceExhausted)?;

        let ad = DataMessage::associated_data(self.session_number, sequence_number);
        let (ciphertext, tag) =
            aead::seal(&self.keys.local, self.session_number, sequence_number, &ad, plaintext)?;
        self.next_sequence += 1;

        Ok(DataMessage {
            session_number: self.session_number,
            sequence_number,
            ciphertext: Bytes::from(ciphertext),
            tag,
        })
    }

    /// Authenticate and decrypt an inbound DATA message.
    ///
    /// # Errors
    ///
    /// - `UnknownSession` if the message belongs to another session
    /// - `ReplayDetected` if the sequence number is not fresh
    /// - `AuthenticationFailed` if the tag does not verify
    pub fn open(&mut self, message: &DataMessage) -> Result<Vec<u8>, ChannelError> {
        if message.session_number != self.session_number {
            return Err(ChannelError::UnknownSession { session_number: message.session_number });
        }
        self.replay.check(message.sequence_number)?;

        let ad = DataMessage::associated_data(message.session_number, message.sequence_number);
        let plaintext = aead::open(
            &self.keys.remote,
            message.session_number,
            message.sequence_number,
            &ad,
            &message.ciphertext,
            &message.tag,
        )?;

        self.replay.accept(message.sequence_number);
        Ok(plaintext)
    }
}

/// Our half of a session negotiation, kept until the peer answers.
#[derive(Debug)]
pub struct PendingSession {
    /// Session number we offered
    pub session_number: u32,
    /// Ephemeral key pair whose public half we sent
    pub key_pair: EphemeralKeyPair,
    /// The SESSION_REQUEST as sent
    pub request: SessionMessage,
}

impl PendingSession {
    /// Ordering key used to break simultaneous-request ties: the request with
    /// the greater `(session_number, public_key)` wins on both sides.
    #[must_use]
    pub fn tie_break_key(&self) -> (u32, [u8; 32]) {
        (self.session_number, self.key_pair.public_key())
    }
}
