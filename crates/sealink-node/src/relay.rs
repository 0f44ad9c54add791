//! Node callbacks: log milestones, apply the trust list and feed decrypted
//! frames into the local switch.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use sealink_core::{
    ChannelError, DatagramTransport, Engine, EnginePort, Environment, Handler, PortId, Switch,
};
use sealink_proto::Certificate;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the handler hands to the relay task
#[derive(Debug)]
pub enum RelayEvent {
    /// A session with this peer is up; give it a switch port
    Attach(SocketAddr),
    /// Frame decrypted from this peer
    Frame(SocketAddr, Vec<u8>),
}

/// Handler for `sealink run` and `sealink demo`.
pub struct NodeHandler {
    name: String,
    trusted_subjects: Vec<String>,
    relay: mpsc::UnboundedSender<RelayEvent>,
}

impl NodeHandler {
    /// Handler trusting `trusted_subjects` (everyone if empty), paired with
    /// the receiving end for [`run_relay`].
    pub fn new(
        name: impl Into<String>,
        trusted_subjects: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (relay, events) = mpsc::unbounded_channel();
        (Self { name: name.into(), trusted_subjects, relay }, events)
    }

    fn trusts(&self, subject: Option<&str>) -> bool {
        self.trusted_subjects.is_empty()
            || subject.is_some_and(|s| self.trusted_subjects.iter().any(|t| t == s))
    }

    fn forward(&self, event: RelayEvent) {
        if self.relay.send(event).is_err() {
            debug!(node = %self.name, "relay stopped, dropping event");
        }
    }
}

impl Handler for NodeHandler {
    fn on_hello_response(&self, sender: SocketAddr, error: Option<&ChannelError>, elapsed: Duration) {
        match error {
            None => info!(node = %self.name, peer = %sender, ?elapsed, "peer is alive"),
            Some(error) => warn!(node = %self.name, peer = %sender, ?elapsed, %error, "greet failed"),
        }
    }

    fn on_presentation_received(
        &self,
        sender: SocketAddr,
        signature_certificate: &Certificate,
        _encryption_certificate: &Certificate,
        is_new: bool,
    ) -> bool {
        let subject = signature_certificate.subject();
        let trusted = self.trusts(subject.as_deref());
        let fingerprint = hex::encode(&signature_certificate.fingerprint()[..8]);
        if trusted {
            info!(node = %self.name, peer = %sender, ?subject, %fingerprint, is_new, "trusting peer");
        } else {
            warn!(node = %self.name, peer = %sender, ?subject, %fingerprint, "untrusted peer");
        }
        trusted
    }

    fn on_session_established(&self, sender: SocketAddr, session_number: u32) {
        info!(node = %self.name, peer = %sender, session_number, "tunnel up");
        self.forward(RelayEvent::Attach(sender));
    }

    fn on_data_received(&self, sender: SocketAddr, payload: &[u8]) {
        debug!(node = %self.name, peer = %sender, len = payload.len(), "frame received");
        self.forward(RelayEvent::Frame(sender, payload.to_vec()));
    }
}

/// Bridge tunnel peers through `switch` until the handler goes away.
///
/// Every peer with a session becomes a switch port; frames from a peer are
/// switched to the other peers' tunnels.
pub async fn run_relay<T, E>(
    name: String,
    engine: Engine<T, E>,
    switch: Arc<Switch>,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
) where
    T: DatagramTransport,
    E: Environment<Instant = std::time::Instant>,
{
    let mut ports: HashMap<SocketAddr, PortId> = HashMap::new();
    let mut next_port = 0u32;

    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Attach(peer) => {
                ports.entry(peer).or_insert_with(|| {
                    let id = PortId(next_port);
                    next_port += 1;
                    switch.add_port(id, Arc::new(EnginePort::new(engine.clone(), peer)));
                    info!(node = %name, %peer, port = %id, "attached to switch");
                    id
                });
            },
            RelayEvent::Frame(peer, frame) => {
                let Some(&port) = ports.get(&peer) else {
                    warn!(node = %name, %peer, "frame from peer without a port");
                    continue;
                };
                let delivered = switch.receive_data(port, &frame).await;
                debug!(node = %name, %peer, delivered, "frame switched");
            },
        }
    }
}
