//! Turmoil UDP socket as a `DatagramTransport`.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use sealink_core::DatagramTransport;
use turmoil::net::UdpSocket;

/// Simulated UDP socket for engines running inside a turmoil host.
///
/// Datagrams are subject to the simulation's latency, fail rate and
/// partitions.
pub struct SimTransport {
    socket: UdpSocket,
}

impl SimTransport {
    /// Bind on the current simulated host, e.g. `"0.0.0.0:12000"`.
    ///
    /// # Errors
    ///
    /// Returns the bind error, e.g. if the port is taken.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        Ok(Self { socket: UdpSocket::bind(addr).await? })
    }
}

#[async_trait]
impl DatagramTransport for SimTransport {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(datagram, target).await
    }

    async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
