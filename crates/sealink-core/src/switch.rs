//! Ethernet frame switch fed by decrypted DATA payloads.
//!
//! Each port is something that can carry a frame: usually an
//! [`EnginePort`] tunnelling to one peer. The switch decides which ports a
//! frame leaves on. Routing is a single pure decision ([`Switch::forward`])
//! so it can be tested without any I/O.
//!
//! # Learning mode
//!
//! - Source MAC addresses are learned per port on every frame
//! - Known unicast destinations go to their learned port only, and are
//!   dropped when that port is the one the frame came from
//! - Broadcast, multicast and unknown destinations flood to every other port
//! - Frames shorter than an Ethernet header are dropped

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::{
    engine::Engine, env::Environment, error::ChannelError, transport::DatagramTransport,
};

/// Length of destination MAC + source MAC + EtherType
pub const ETHERNET_HEADER_SIZE: usize = 14;

type MacAddress = [u8; 6];

/// Identifier of a switch port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

/// Something a frame can be written to.
#[async_trait]
pub trait Port: Send + Sync + 'static {
    /// Deliver `frame` out of this port.
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError>;
}

/// Port that tunnels frames to one peer as encrypted DATA.
pub struct EnginePort<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    engine: Engine<T, E>,
    endpoint: SocketAddr,
}

impl<T, E> EnginePort<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    /// Port sending through `engine` to `endpoint`
    pub fn new(engine: Engine<T, E>, endpoint: SocketAddr) -> Self {
        Self { engine, endpoint }
    }

    /// Peer this port tunnels to
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }
}

#[async_trait]
impl<T, E> Port for EnginePort<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        self.engine.send_data(self.endpoint, frame).await
    }
}

/// How the switch picks output ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMethod {
    /// Every frame goes to every other port
    Hub,
    /// Forward by learned source addresses
    #[default]
    LearningSwitch,
}

#[derive(Default)]
struct SwitchState {
    ports: BTreeMap<PortId, Arc<dyn Port>>,
    mac_table: HashMap<MacAddress, PortId>,
}

/// Frame switch over a set of ports.
pub struct Switch {
    method: RoutingMethod,
    state: Mutex<SwitchState>,
}

impl Switch {
    /// Empty switch using `method`
    #[must_use]
    pub fn new(method: RoutingMethod) -> Self {
        Self { method, state: Mutex::new(SwitchState::default()) }
    }

    /// Routing method in use
    #[must_use]
    pub fn method(&self) -> RoutingMethod {
        self.method
    }

    /// Attach `port` under `id`, replacing any port already there.
    pub fn add_port(&self, id: PortId, port: Arc<dyn Port>) {
        let mut state = self.lock();
        state.ports.insert(id, port);
        debug!(port = %id, "port attached");
    }

    /// Detach `id` and forget every address learned on it.
    pub fn remove_port(&self, id: PortId) -> bool {
        let mut state = self.lock();
        state.mac_table.retain(|_, port| *port != id);
        state.ports.remove(&id).is_some()
    }

    /// Attached port ids in ascending order
    #[must_use]
    pub fn ports(&self) -> Vec<PortId> {
        self.lock().ports.keys().copied().collect()
    }

    /// Port `mac` was last seen on
    #[must_use]
    pub fn learned_port(&self, mac: &[u8; 6]) -> Option<PortId> {
        self.lock().mac_table.get(mac).copied()
    }

    /// Decide which ports `frame`, arriving on `source`, leaves on.
    ///
    /// In learning mode this also records the frame's source address.
    pub fn forward(&self, source: PortId, frame: &[u8]) -> BTreeSet<PortId> {
        let mut state = self.lock();
        let flood = |state: &SwitchState| {
            state.ports.keys().copied().filter(|id| *id != source).collect::<BTreeSet<_>>()
        };

        match self.method {
            RoutingMethod::Hub => flood(&state),
            RoutingMethod::LearningSwitch => {
                let Some((destination, origin)) = mac_addresses(frame) else {
                    trace!(port = %source, len = frame.len(), "runt frame dropped");
                    return BTreeSet::new();
                };

                if !is_group_address(&origin) && state.ports.contains_key(&source) {
                    state.mac_table.insert(origin, source);
                }
                if is_group_address(&destination) {
                    return flood(&state);
                }
                match state.mac_table.get(&destination) {
                    Some(port) if *port == source => BTreeSet::new(),
                    Some(port) => BTreeSet::from([*port]),
                    None => flood(&state),
                }
            },
        }
    }

    /// Switch a frame received on `source` out to its destination ports.
    ///
    /// Per-port send failures are logged; they do not stop delivery to the
    /// remaining ports. Returns how many ports accepted the frame.
    pub async fn receive_data(&self, source: PortId, frame: &[u8]) -> usize {
        let targets: Vec<_> = {
            let targets = self.forward(source, frame);
            let state = self.lock();
            targets
                .into_iter()
                .filter_map(|id| state.ports.get(&id).map(|port| (id, Arc::clone(port))))
                .collect()
        };

        let mut delivered = 0;
        for (id, port) in targets {
            match port.send(frame).await {
                Ok(()) => delivered += 1,
                Err(error) => warn!(from = %source, to = %id, %error, "frame not forwarded"),
            }
        }
        delivered
    }

    /// Write `frame` out of `port` directly.
    ///
    /// # Errors
    ///
    /// `Transport` if no such port is attached, otherwise the port's own error.
    pub async fn send_data_to(&self, port: PortId, frame: &[u8]) -> Result<(), ChannelError> {
        let target = self.lock().ports.get(&port).cloned();
        let target = target.ok_or_else(|| ChannelError::Transport(format!("no such {port}")))?;
        target.send(frame).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SwitchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Switch")
            .field("method", &self.method)
            .field("ports", &state.ports.keys().collect::<Vec<_>>())
            .field("learned", &state.mac_table.len())
            .finish()
    }
}

fn mac_addresses(frame: &[u8]) -> Option<(MacAddress, MacAddress)> {
    if frame.len() < ETHERNET_HEADER_SIZE {
        return None;
    }
    let mut destination = [0u8; 6];
    let mut source = [0u8; 6];
    destination.copy_from_slice(&frame[..6]);
    source.copy_from_slice(&frame[6..12]);
    Some((destination, source))
}

// Broadcast is a group address too.
fn is_group_address(mac: &MacAddress) -> bool {
    mac[0] & 0x01 != 0
}
