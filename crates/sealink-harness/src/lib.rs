//! Deterministic simulation harness for Sealink protocol testing.
//!
//! This crate provides turmoil-based implementations of the `Environment`
//! and `DatagramTransport` traits, so whole engines can be run against each
//! other on a simulated network with virtual time, packet loss and
//! partitions, reproducibly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod node;
pub mod recorder;
pub mod sim_env;
pub mod sim_transport;

pub use node::{SimEngine, next_event, peer, spawn_node, wait_for_session};
pub use recorder::{Event, RecordingHandler};
pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
