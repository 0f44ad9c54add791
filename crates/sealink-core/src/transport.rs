//! Datagram transport abstraction.
//!
//! The engine needs exactly three things from a socket: send a datagram to an
//! address, receive a datagram with its sender, and report the bound
//! address. Both methods take `&self` so every worker can share one socket.
//!
//! # Implementations
//!
//! - `tokio::net::UdpSocket` (production): implemented here
//! - `SimTransport` (testing): turmoil's simulated UDP socket, in
//!   `sealink-harness`
//!
//! Errors are advisory: a failed send cancels only the operation that
//! issued it, and a failed receive is logged by the worker that saw it.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// An unreliable, unordered datagram socket bound to one local port.
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Send one datagram to `target`.
    ///
    /// # Errors
    ///
    /// Returns the socket error; nothing is retried.
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buffer`, returning its length and sender.
    ///
    /// Datagrams longer than `buffer` are truncated by the OS.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramTransport for UdpSocket {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, datagram, target).await
    }

    async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buffer).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
