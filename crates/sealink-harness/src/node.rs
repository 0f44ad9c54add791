//! Helpers for running engines as turmoil hosts.

use std::{net::SocketAddr, time::Duration};

use sealink_core::{ChannelError, Engine, EngineConfig, Handler, IdentityStore};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{Event, SimEnv, SimTransport};

/// Engine running on the simulated network
pub type SimEngine = Engine<SimTransport, SimEnv>;

/// Start an engine for the current host on `port`, identified as `CN=<name>`.
///
/// The environment is seeded with `seed` so session keys are reproducible.
///
/// # Errors
///
/// `Transport` if the port cannot be bound, `IdentityLoad` if the identity
/// cannot be generated.
pub async fn spawn_node(
    name: &str,
    port: u16,
    seed: u64,
    config: EngineConfig,
    handler: impl Handler,
) -> Result<SimEngine, ChannelError> {
    let identity = IdentityStore::generate(name)?;
    let transport = SimTransport::bind(&format!("0.0.0.0:{port}")).await?;
    Ok(Engine::spawn(identity, transport, SimEnv::with_seed(seed), config, handler))
}

/// Address of `host`'s engine on `port`.
///
/// # Panics
///
/// Panics outside a simulation or for an unknown host.
pub fn peer(host: &str, port: u16) -> SocketAddr {
    SocketAddr::new(turmoil::lookup(host), port)
}

/// Next recorded event, or `None` if nothing arrives within `within` of
/// virtual time.
pub async fn next_event(events: &mut UnboundedReceiver<Event>, within: Duration) -> Option<Event> {
    tokio::time::timeout(within, events.recv()).await.ok().flatten()
}

/// Skip events until a session is established; returns its number.
pub async fn wait_for_session(
    events: &mut UnboundedReceiver<Event>,
    within: Duration,
) -> Option<u32> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if let Event::SessionEstablished { session_number, .. } =
            next_event(events, remaining).await?
        {
            return Some(session_number);
        }
    }
}
