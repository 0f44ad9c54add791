//! Handler that turns callbacks into a stream of events for assertions.

use std::{net::SocketAddr, time::Duration};

use sealink_core::{ChannelError, Handler};
use sealink_proto::Certificate;
use tokio::sync::mpsc;
use tracing::trace;

/// A callback observed by [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `greet` finished; `error` holds the failure's display text
    HelloResponse {
        /// Peer greeted
        peer: SocketAddr,
        /// `None` on success
        error: Option<String>,
        /// Time from first request to outcome
        elapsed: Duration,
    },
    /// A verified presentation arrived
    Presentation {
        /// Presenting peer
        peer: SocketAddr,
        /// Subject of the signature certificate
        subject: Option<String>,
        /// Whether it differed from the stored one
        is_new: bool,
    },
    /// Session keys are in place
    SessionEstablished {
        /// Peer
        peer: SocketAddr,
        /// Agreed session number
        session_number: u32,
    },
    /// Plaintext arrived
    Data {
        /// Sender
        peer: SocketAddr,
        /// Decrypted payload
        payload: Vec<u8>,
    },
}

/// Handler that records every callback and trusts a configurable answer.
pub struct RecordingHandler {
    events: mpsc::UnboundedSender<Event>,
    trust: bool,
}

impl RecordingHandler {
    /// Handler trusting every presentation, plus the receiving end of its
    /// events.
    pub fn trusting() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, trust: true }, rx)
    }

    /// Handler rejecting every presentation
    pub fn distrusting() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, trust: false }, rx)
    }

    fn record(&self, event: Event) {
        trace!(?event, "recorded");
        // The test may have stopped listening.
        let _ = self.events.send(event);
    }
}

impl Handler for RecordingHandler {
    fn on_hello_response(&self, peer: SocketAddr, error: Option<&ChannelError>, elapsed: Duration) {
        self.record(Event::HelloResponse { peer, error: error.map(ToString::to_string), elapsed });
    }

    fn on_presentation_received(
        &self,
        peer: SocketAddr,
        signature_certificate: &Certificate,
        _encryption_certificate: &Certificate,
        is_new: bool,
    ) -> bool {
        self.record(Event::Presentation { peer, subject: signature_certificate.subject(), is_new });
        self.trust
    }

    fn on_session_established(&self, peer: SocketAddr, session_number: u32) {
        self.record(Event::SessionEstablished { peer, session_number });
    }

    fn on_data_received(&self, peer: SocketAddr, payload: &[u8]) {
        self.record(Event::Data { peer, payload: payload.to_vec() });
    }
}
