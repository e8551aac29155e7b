//! Datagram transports.
//!
//! Implementations:
//! - [`UdpTransport`]: a UDP socket served from a dedicated I/O thread.
//! - [`MemoryTransport`]: an endpoint on an in-process [`MemoryNetwork`],
//!   with fault injection for tests and local play.

mod memory;
mod udp;

use std::net::SocketAddr;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

use crate::error::NetError;

/// A non-blocking, unreliable datagram socket.
pub trait Transport {
    /// Take the next queued datagram, if any. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] once the transport can no
    /// longer receive.
    fn try_recv(&mut self) -> Result<Option<(SocketAddr, Vec<u8>)>, NetError>;

    /// Queue a datagram for `addr`. Delivery is not guaranteed.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] once the transport can no
    /// longer send.
    fn send(&mut self, addr: SocketAddr, datagram: Vec<u8>) -> Result<(), NetError>;

    /// The address remotes see this transport as.
    fn local_addr(&self) -> SocketAddr;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn try_recv(&mut self) -> Result<Option<(SocketAddr, Vec<u8>)>, NetError> {
        (**self).try_recv()
    }

    fn send(&mut self, addr: SocketAddr, datagram: Vec<u8>) -> Result<(), NetError> {
        (**self).send(addr, datagram)
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }
}
