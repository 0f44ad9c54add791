//! Per-endpoint handshake state and the concurrent table that holds it.
//!
//! # Concurrency
//!
//! [`EndpointTable`] is a sharded concurrent map from peer address to an
//! `Arc<Mutex<EndpointContext>>`. The map lock is held only long enough to
//! clone the `Arc`; all handshake work happens under the per-endpoint mutex,
//! so different peers proceed in parallel while operations on one peer are
//! serialized.
//!
//! Callers MUST NOT invoke application callbacks while holding an endpoint
//! lock. The handshake state machine returns actions instead of calling out,
//! which keeps that rule easy to follow.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use dashmap::DashMap;
use sealink_proto::Certificate;
use tokio::sync::oneshot;

use crate::{
    error::ChannelError,
    session::{PendingSession, Session},
};

/// An outstanding HELLO_REQUEST.
///
/// Completing it wakes the `greet` call that is waiting on it. Dropping it
/// without completing (forget, close) wakes the waiter with a closed
/// channel.
#[derive(Debug)]
pub struct PendingHello {
    sent_at: Instant,
    responder: oneshot::Sender<()>,
}

impl PendingHello {
    /// Create a pending entry that signals `responder` on completion
    pub fn new(sent_at: Instant, responder: oneshot::Sender<()>) -> Self {
        Self { sent_at, responder }
    }

    /// When the first request for this nonce was sent
    #[must_use]
    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    /// Wake the waiter. Returns false if it already gave up.
    pub fn complete(self) -> bool {
        self.responder.send(()).is_ok()
    }
}

/// Certificates a peer presented to us.
#[derive(Debug, Clone)]
pub struct PeerPresentation {
    /// Certificate whose key signs the peer's handshake messages
    pub signature_certificate: Certificate,
    /// Certificate naming the peer's encryption endpoint
    pub encryption_certificate: Certificate,
    /// Whether the application accepted these certificates
    pub trusted: bool,
}

impl PeerPresentation {
    fn matches(&self, signature: &Certificate, encryption: &Certificate) -> bool {
        self.signature_certificate.fingerprint() == signature.fingerprint()
            && self.encryption_certificate.fingerprint() == encryption.fingerprint()
    }
}

/// Handshake progress with one endpoint, derived from the context contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Nothing known about the peer
    Unknown,
    /// At least one HELLO_REQUEST awaits its response
    HelloSent,
    /// The peer presented certificates we trust
    Presented,
    /// Our SESSION_REQUEST awaits its SESSION
    SessionNegotiating,
    /// Session keys are in place
    SessionEstablished,
}

/// Mutable state for one remote peer.
#[derive(Debug)]
pub struct EndpointContext {
    endpoint: SocketAddr,
    next_hello_number: u32,
    pending_hellos: HashMap<u32, PendingHello>,
    peer: Option<PeerPresentation>,
    presented: bool,
    next_session_number: u32,
    pending_session: Option<PendingSession>,
    session: Option<Session>,
}

impl EndpointContext {
    /// Fresh context for `endpoint`.
    #[must_use]
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            next_hello_number: 0,
            pending_hellos: HashMap::new(),
            peer: None,
            presented: false,
            next_session_number: 0,
            pending_session: None,
            session: None,
        }
    }

    /// Peer address this context belongs to
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Returns the next hello number and advances the counter (wrapping).
    pub fn allocate_hello_nonce(&mut self) -> u32 {
        let nonce = self.next_hello_number;
        self.next_hello_number = self.next_hello_number.wrapping_add(1);
        nonce
    }

    /// Register an outstanding request under `nonce`.
    pub fn record_pending(&mut self, nonce: u32, pending: PendingHello) {
        self.pending_hellos.insert(nonce, pending);
    }

    /// Remove and return the request registered under `nonce`.
    ///
    /// Succeeds at most once per recorded nonce.
    pub fn resolve_pending(&mut self, nonce: u32) -> Option<PendingHello> {
        self.pending_hellos.remove(&nonce)
    }

    /// Drop every outstanding request, waking their waiters with a closed
    /// channel. Returns how many were dropped.
    pub fn clear_pending_hellos(&mut self) -> usize {
        let count = self.pending_hellos.len();
        self.pending_hellos.clear();
        count
    }

    /// Number of HELLO requests awaiting a response
    #[must_use]
    pub fn pending_hello_count(&self) -> usize {
        self.pending_hellos.len()
    }

    /// Record presented certificates and return whether they are new.
    ///
    /// `is_new` is false only when the certificates are byte-identical to the
    /// stored ones, in which case the current trust decision stays in place.
    /// Different certificates replace the stored ones untrusted until
    /// [`EndpointContext::set_trust`] is called. The session and any
    /// negotiation under the old identity are discarded, and the new identity
    /// has not seen our presentation yet.
    pub fn accept_presentation(&mut self, signature: Certificate, encryption: Certificate) -> bool {
        if self.presents(&signature, &encryption) {
            return false;
        }
        if self.peer.is_some() {
            self.pending_session = None;
            self.session = None;
            self.presented = false;
        }
        self.peer = Some(PeerPresentation {
            signature_certificate: signature,
            encryption_certificate: encryption,
            trusted: false,
        });
        true
    }

    /// Whether these are the stored certificates
    #[must_use]
    pub fn presents(&self, signature: &Certificate, encryption: &Certificate) -> bool {
        self.peer.as_ref().is_some_and(|p| p.matches(signature, encryption))
    }

    /// Record the application's trust decision for the stored certificates.
    ///
    /// Distrust tears down the session and any negotiation in flight.
    /// Returns false if no certificates are stored.
    pub fn set_trust(&mut self, trusted: bool) -> bool {
        let Some(peer) = self.peer.as_mut() else {
            return false;
        };
        peer.trusted = trusted;
        if !trusted {
            self.pending_session = None;
            self.session = None;
        }
        true
    }

    /// Certificates the peer presented, trusted or not
    #[must_use]
    pub fn peer(&self) -> Option<&PeerPresentation> {
        self.peer.as_ref()
    }

    /// Certificates the peer presented, if the application trusted them
    #[must_use]
    pub fn trusted_peer(&self) -> Option<&PeerPresentation> {
        self.peer.as_ref().filter(|p| p.trusted)
    }

    /// Whether we sent our own PRESENTATION to this peer
    #[must_use]
    pub fn has_presented(&self) -> bool {
        self.presented
    }

    /// Record that our PRESENTATION went out
    pub fn mark_presented(&mut self) {
        self.presented = true;
    }

    /// Next session number to offer: above every number seen so far.
    pub fn allocate_session_number(&mut self) -> u32 {
        let floor = self.session.as_ref().map_or(0, |s| s.session_number().saturating_add(1));
        let number = self.next_session_number.max(floor);
        self.next_session_number = number.saturating_add(1);
        number
    }

    /// Keep our counter above a number the peer used.
    pub fn observe_session_number(&mut self, session_number: u32) {
        self.next_session_number = self.next_session_number.max(session_number.saturating_add(1));
    }

    /// Install a newly negotiated session.
    ///
    /// # Errors
    ///
    /// Returns `SessionRejected` if a session with an equal or higher number
    /// is already established.
    pub fn establish_session(&mut self, session: Session) -> Result<(), ChannelError> {
        if let Some(current) = self.session.as_ref().map(Session::session_number) {
            if session.session_number() <= current {
                return Err(ChannelError::SessionRejected {
                    received: session.session_number(),
                    current,
                });
            }
        }
        self.observe_session_number(session.session_number());
        self.session = Some(session);
        Ok(())
    }

    /// Established session, if any
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Our in-flight SESSION_REQUEST, if any
    #[must_use]
    pub fn pending_session(&self) -> Option<&PendingSession> {
        self.pending_session.as_ref()
    }

    pub(crate) fn set_pending_session(&mut self, pending: PendingSession) {
        self.pending_session = Some(pending);
    }

    pub(crate) fn take_pending_session(&mut self) -> Option<PendingSession> {
        self.pending_session.take()
    }

    /// Derived handshake state
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        if self.session.is_some() {
            HandshakeState::SessionEstablished
        } else if self.pending_session.is_some() {
            HandshakeState::SessionNegotiating
        } else if self.trusted_peer().is_some() {
            HandshakeState::Presented
        } else if !self.pending_hellos.is_empty() {
            HandshakeState::HelloSent
        } else {
            HandshakeState::Unknown
        }
    }
}

/// Shared handle to one endpoint's context
pub type EndpointHandle = Arc<Mutex<EndpointContext>>;

/// Lock an endpoint context, recovering the data if a previous holder
/// panicked.
pub fn lock(handle: &EndpointHandle) -> MutexGuard<'_, EndpointContext> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent map of endpoint contexts.
#[derive(Debug, Default)]
pub struct EndpointTable {
    contexts: DashMap<SocketAddr, EndpointHandle>,
}

impl EndpointTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `endpoint`, created on first use.
    ///
    /// Concurrent callers for the same endpoint receive the same context.
    pub fn get_or_create(&self, endpoint: SocketAddr) -> EndpointHandle {
        self.contexts
            .entry(endpoint)
            .or_insert_with(|| Arc::new(Mutex::new(EndpointContext::new(endpoint))))
            .clone()
    }

    /// Context for `endpoint` if one exists
    #[must_use]
    pub fn get(&self, endpoint: &SocketAddr) -> Option<EndpointHandle> {
        self.contexts.get(endpoint).map(|entry| entry.value().clone())
    }

    /// Drop the context for `endpoint`. Returns whether one existed.
    ///
    /// Pending hellos are dropped with it, waking their waiters even if
    /// another task still holds the context.
    pub fn forget(&self, endpoint: &SocketAddr) -> bool {
        match self.contexts.remove(endpoint) {
            Some((_, handle)) => {
                lock(&handle).clear_pending_hellos();
                true
            },
            None => false,
        }
    }

    /// Drop every context, waking every pending hello.
    pub fn clear(&self) {
        for entry in self.contexts.iter() {
            lock(entry.value()).clear_pending_hellos();
        }
        self.contexts.clear();
    }

    /// Number of known endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no endpoint is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
