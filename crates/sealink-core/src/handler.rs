//! Application callbacks.
//!
//! The engine calls these from its worker tasks, never while holding an
//! endpoint lock, so a handler may call back into the engine (for example
//! `send_data` from `on_session_established`). Handlers should return
//! quickly; anything slow belongs on a spawned task.

use std::{net::SocketAddr, time::Duration};

use sealink_proto::Certificate;

use crate::error::ChannelError;

/// Receives protocol milestones for every endpoint.
///
/// Every method has a default, so implementors override only what they
/// need. The defaults answer HELLOs per configuration and trust nobody.
pub trait Handler: Send + Sync + 'static {
    /// A HELLO_REQUEST arrived. Return true to answer it.
    ///
    /// `default_accept` is the engine's configured default.
    fn on_hello_received(&self, sender: SocketAddr, default_accept: bool) -> bool {
        let _ = sender;
        default_accept
    }

    /// A `greet` finished: `error` is `None` on success, `Timeout` or a
    /// transport error otherwise.
    fn on_hello_response(
        &self,
        sender: SocketAddr,
        error: Option<&ChannelError>,
        elapsed: Duration,
    ) {
        let _ = (sender, error, elapsed);
    }

    /// A verified PRESENTATION arrived. Return true to trust the peer.
    ///
    /// `is_new` is false only when the certificates are byte-identical to
    /// ones previously presented by this endpoint.
    fn on_presentation_received(
        &self,
        sender: SocketAddr,
        signature_certificate: &Certificate,
        encryption_certificate: &Certificate,
        is_new: bool,
    ) -> bool {
        let _ = (sender, signature_certificate, encryption_certificate, is_new);
        false
    }

    /// Session keys with `sender` are in place.
    fn on_session_established(&self, sender: SocketAddr, session_number: u32) {
        let _ = (sender, session_number);
    }

    /// Authenticated plaintext arrived.
    fn on_data_received(&self, sender: SocketAddr, payload: &[u8]) {
        let _ = (sender, payload);
    }
}

/// Handler that keeps every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl Handler for NoopHandler {}
