//! Handshake state machine.
//!
//! # Architecture: Action-Based State Machine
//!
//! [`EndpointContext::handle_message`] consumes one decoded datagram and
//! returns the [`Action`]s the driver must perform. It never performs I/O
//! and never calls application code. Decisions that belong to the
//! application (answering a HELLO, trusting certificates) come back as
//! `Consult*` actions; the driver asks the application without holding the
//! endpoint lock and feeds the answer back through
//! [`EndpointContext::apply_trust_decision`].
//!
//! # Message Flow
//!
//! ```text
//!  A (initiator)                                   B (responder)
//!    │── HELLO_REQUEST(n) ──────────────────────────>│ ConsultHelloPolicy
//!    │<───────────────────────── HELLO_RESPONSE(n) ──│
//!    │── PRESENTATION(A) ───────────────────────────>│ ConsultTrust
//!    │<─────────────────────────── PRESENTATION(B) ──│ (B had not presented)
//!    │── SESSION_REQUEST(s, pk_A) ──────────────────>│ (A had presented)
//!    │<──────────────────────── SESSION(s, pk_B) ────│ SessionEstablished
//!    │   SessionEstablished                          │
//!    │<═══════════════════ DATA ════════════════════>│
//! ```
//!
//! Certificates are recorded, and `is_new` decided, the moment a
//! PRESENTATION is handled. The application's answer only gates what
//! follows. After a trusted presentation:
//!
//! - a side that has not presented yet answers with its own PRESENTATION
//! - a side with a SESSION_REQUEST in flight waits for it
//! - otherwise it starts a session, re-sending its PRESENTATION first when
//!   the peer repeated itself, since a repeat means the peer restarted the
//!   handshake and may have lost ours
//!
//! Every reply to a repeated presentation opens a negotiation, and an open
//! negotiation silences further replies, so two sides re-presenting to each
//! other settle after one round. When both sides request at once, the request
//! with the greater `(session_number, public_key)` wins on both ends.

use sealink_proto::{CipherSuite, Message, MessageType, Presentation, ProtocolError, SessionMessage};
use tracing::debug;

use crate::{
    context::{EndpointContext, PendingHello},
    crypto::{EphemeralKeyPair, SessionKeys},
    env::Environment,
    error::ChannelError,
    identity::IdentityStore,
    session::{PendingSession, Session},
};

/// Actions returned by the handshake state machine.
///
/// The driver executes them in order:
/// - `Send`: encode and send to the peer
/// - `ConsultHelloPolicy`: ask the hello callback, answer if it accepts
/// - `CompleteHello`: wake the matching `greet`
/// - `ConsultTrust`: ask the presentation callback, then call
///   [`EndpointContext::apply_trust_decision`]
/// - `SessionEstablished`: notify the application
/// - `Deliver`: hand plaintext to the application
#[derive(Debug)]
pub enum Action {
    /// Send this message to the peer
    Send(Message),

    /// Peer sent HELLO_REQUEST; reply with HELLO_RESPONSE if accepted
    ConsultHelloPolicy {
        /// Nonce to echo
        nonce: u32,
    },

    /// A HELLO_RESPONSE matched an outstanding request
    CompleteHello {
        /// Nonce that matched
        nonce: u32,
        /// The resolved request
        pending: PendingHello,
    },

    /// Peer presented certificates; the application decides on trust
    ConsultTrust {
        /// Verified presentation
        presentation: Presentation,
        /// False only for a byte-identical re-presentation
        is_new: bool,
    },

    /// A session was installed
    SessionEstablished {
        /// Agreed session number
        session_number: u32,
    },

    /// Authenticated plaintext from the peer
    Deliver(Vec<u8>),
}

impl EndpointContext {
    /// Process one decoded datagram from this context's endpoint.
    ///
    /// # Errors
    ///
    /// - `UnmatchedResponse` for a HELLO_RESPONSE nobody waits for
    /// - `UntrustedPeer` for SESSION_REQUEST/SESSION before a trusted
    ///   PRESENTATION
    /// - `InvalidSignature` if a session message is not signed by the peer's
    ///   presented certificate
    /// - `SessionRejected` for a session number that is not newer than the
    ///   established one
    /// - `UnknownSession` for a SESSION that answers no pending request
    /// - `NoSession`, `ReplayDetected`, `AuthenticationFailed` for DATA
    ///
    /// Every error leaves the context as it was before the call.
    pub fn handle_message(
        &mut self,
        message: Message,
        identity: &IdentityStore,
        env: &impl Environment,
    ) -> Result<Vec<Action>, ChannelError> {
        match message {
            Message::HelloRequest(hello) => {
                Ok(vec![Action::ConsultHelloPolicy { nonce: hello.nonce }])
            },
            Message::HelloResponse(hello) => match self.resolve_pending(hello.nonce) {
                Some(pending) => Ok(vec![Action::CompleteHello { nonce: hello.nonce, pending }]),
                None => Err(ChannelError::UnmatchedResponse { nonce: hello.nonce }),
            },
            Message::Presentation(presentation) => {
                let is_new = self.accept_presentation(
                    presentation.signature_certificate.clone(),
                    presentation.encryption_certificate.clone(),
                );
                Ok(vec![Action::ConsultTrust { presentation, is_new }])
            },
            Message::SessionRequest(request) => self.handle_session_request(request, identity, env),
            Message::Session(reply) => self.handle_session(reply),
            Message::Data(data) => {
                let session = self.session_mut().ok_or(ChannelError::NoSession)?;
                let plaintext = session.open(&data)?;
                Ok(vec![Action::Deliver(plaintext)])
            },
        }
    }

    /// Apply the application's answer to a [`Action::ConsultTrust`].
    ///
    /// A decision about certificates that have since been replaced is
    /// ignored. Acceptance continues the handshake, rejection stops it.
    ///
    /// # Errors
    ///
    /// Only if starting the session fails.
    pub fn apply_trust_decision(
        &mut self,
        presentation: &Presentation,
        is_new: bool,
        accepted: bool,
        identity: &IdentityStore,
        env: &impl Environment,
    ) -> Result<Vec<Action>, ChannelError> {
        if !self.presents(&presentation.signature_certificate, &presentation.encryption_certificate)
        {
            debug!(peer = %self.endpoint(), "trust decision for replaced certificates");
            return Ok(Vec::new());
        }

        self.set_trust(accepted);
        if !accepted {
            return Ok(Vec::new());
        }

        if !self.has_presented() {
            self.mark_presented();
            return Ok(vec![Action::Send(Message::Presentation(identity.presentation()))]);
        }
        if self.pending_session().is_some() {
            return Ok(Vec::new());
        }

        let mut actions = Vec::with_capacity(2);
        if !is_new {
            actions.push(Action::Send(Message::Presentation(identity.presentation())));
        }
        actions.push(Action::Send(self.begin_session(identity, env)?));
        Ok(actions)
    }

    /// Build our PRESENTATION and record that it was sent.
    ///
    /// This restarts the handshake: a SESSION_REQUEST still in flight is
    /// abandoned so the peer's answer can start a fresh one.
    pub fn introduce(&mut self, identity: &IdentityStore) -> Message {
        self.mark_presented();
        self.take_pending_session();
        Message::Presentation(identity.presentation())
    }

    /// Start a session negotiation with a fresh ephemeral key.
    ///
    /// Replaces any negotiation already in flight. Used both for the first
    /// session and for renewal.
    ///
    /// # Errors
    ///
    /// Returns `UntrustedPeer` if the peer has no trusted presentation.
    pub fn begin_session(
        &mut self,
        identity: &IdentityStore,
        env: &impl Environment,
    ) -> Result<Message, ChannelError> {
        if self.trusted_peer().is_none() {
            return Err(ChannelError::UntrustedPeer);
        }

        let session_number = self.allocate_session_number();
        let key_pair = EphemeralKeyPair::generate(env);
        let request = SessionMessage::signed(
            MessageType::SessionRequest,
            session_number,
            CipherSuite::default(),
            key_pair.public_key(),
            identity,
        );
        self.set_pending_session(PendingSession {
            session_number,
            key_pair,
            request: request.clone(),
        });

        Ok(Message::SessionRequest(request))
    }

    /// Encrypt application data under the established session.
    ///
    /// # Errors
    ///
    /// `NoSession`, `SequenceExhausted` or `PayloadTooLarge`.
    pub fn seal_data(&mut self, plaintext: &[u8]) -> Result<Message, ChannelError> {
        let session = self.session_mut().ok_or(ChannelError::NoSession)?;
        session.seal(plaintext).map(Message::Data)
    }

    fn handle_session_request(
        &mut self,
        request: SessionMessage,
        identity: &IdentityStore,
        env: &impl Environment,
    ) -> Result<Vec<Action>, ChannelError> {
        let peer = self.trusted_peer().ok_or(ChannelError::UntrustedPeer)?;
        request.verify(MessageType::SessionRequest, &peer.signature_certificate)?;

        if let Some(current) = self.session().map(Session::session_number) {
            if request.session_number <= current {
                return Err(ChannelError::SessionRejected {
                    received: request.session_number,
                    current,
                });
            }
        }

        let theirs = (request.session_number, request.public_key);
        let replaces_pending = match self.pending_session() {
            Some(pending) if pending.tie_break_key() > theirs => {
                debug!(
                    peer = %self.endpoint(),
                    ours = pending.session_number,
                    theirs = request.session_number,
                    "session request collision, keeping ours"
                );
                self.observe_session_number(request.session_number);
                return Ok(Vec::new());
            },
            Some(_) => true,
            None => false,
        };

        let key_pair = EphemeralKeyPair::generate(env);
        let shared = key_pair.agree(&request.public_key)?;
        let keys = SessionKeys::derive(
            &shared,
            request.session_number,
            &key_pair.public_key(),
            &request.public_key,
        )?;
        if replaces_pending {
            self.take_pending_session();
        }
        self.establish_session(Session::new(request.session_number, request.cipher_suite, keys))?;

        let reply = SessionMessage::signed(
            MessageType::Session,
            request.session_number,
            request.cipher_suite,
            key_pair.public_key(),
            identity,
        );

        Ok(vec![
            Action::Send(Message::Session(reply)),
            Action::SessionEstablished { session_number: request.session_number },
        ])
    }

    fn handle_session(&mut self, reply: SessionMessage) -> Result<Vec<Action>, ChannelError> {
        let peer = self.trusted_peer().ok_or(ChannelError::UntrustedPeer)?;
        reply.verify(MessageType::Session, &peer.signature_certificate)?;

        let keys = match self.pending_session() {
            Some(pending) if pending.session_number == reply.session_number => {
                if pending.request.cipher_suite != reply.cipher_suite {
                    return Err(ChannelError::MalformedMessage(
                        ProtocolError::UnsupportedCipherSuite(reply.cipher_suite.to_u8()),
                    ));
                }
                let shared = pending.key_pair.agree(&reply.public_key)?;
                SessionKeys::derive(
                    &shared,
                    reply.session_number,
                    &pending.key_pair.public_key(),
                    &reply.public_key,
                )?
            },
            _ => return Err(ChannelError::UnknownSession { session_number: reply.session_number }),
        };

        self.take_pending_session();
        self.establish_session(Session::new(reply.session_number, reply.cipher_suite, keys))?;

        Ok(vec![Action::SessionEstablished { session_number: reply.session_number }])
    }
}
