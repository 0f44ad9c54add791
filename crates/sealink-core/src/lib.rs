//! Sealink protocol core
//!
//! Everything needed to run an authenticated, encrypted datagram tunnel on
//! top of a UDP socket: identities, per-endpoint handshake state, session
//! cryptography and the engine that drives them.
//!
//! # Architecture
//!
//! The handshake logic never touches a socket or a clock:
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ handshake (EndpointContext)  │
//!      │ - message → Vec<Action>      │
//!      │ - nonces, trust, sessions    │
//!      └──────────────────────────────┘
//!                     ↑ ↓
//!      ┌──────────────────────────────┐
//!      │ engine                       │
//!      │ - worker pool on transport   │
//!      │ - retry timers via env       │
//!      │ - Handler callbacks          │
//!      └──────────────────────────────┘
//!         ↓                      ↓
//! ┌────────────────┐  ┌─────────────────┐
//! │ sealink-harness│  │ sealink-node    │
//! │ (Turmoil)      │  │ (Tokio UDP)     │
//! │ - Virtual time │  │ - System clock  │
//! │ - Seeded RNG   │  │ - PEM identities│
//! └────────────────┘  └─────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - Side effects go through [`env::Environment`] and
//!   [`transport::DatagramTransport`]
//! - State transitions return actions; the engine performs them
//! - A failed transition leaves the endpoint's context untouched
//!
//! # Modules
//!
//! - [`engine`]: worker pool, `greet`, `send_data`, `close`
//! - [`handshake`]: per-endpoint state machine
//! - [`context`]: endpoint contexts and the concurrent endpoint table
//! - [`session`]: established sessions and replay protection
//! - [`crypto`]: X25519, HKDF and ChaCha20-Poly1305 helpers
//! - [`identity`]: certificates and signing keys
//! - [`switch`]: Ethernet frame switch over tunnel ports

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod crypto;
pub mod engine;
pub mod env;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod identity;
pub mod session;
pub mod switch;
pub mod transport;

pub use config::{EngineConfig, RetryPolicy};
pub use context::{EndpointContext, EndpointTable, HandshakeState};
pub use engine::Engine;
pub use env::{Environment, SystemEnv};
pub use error::ChannelError;
pub use handler::{Handler, NoopHandler};
pub use handshake::Action;
pub use identity::{IdentityStore, PemIdentity};
pub use switch::{EnginePort, Port, PortId, RoutingMethod, Switch};
pub use transport::DatagramTransport;
