//! In-process datagram network for tests and single-process sessions.
//!
//! Endpoints can be partitioned off, and the next N datagrams on the
//! network can be dropped.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use tracing::trace;

use super::Transport;
use crate::error::NetError;

type Mailbox = VecDeque<(SocketAddr, Vec<u8>)>;

#[derive(Debug)]
struct Inner {
    mailboxes: DashMap<SocketAddr, Mailbox>,
    partitioned: DashSet<SocketAddr>,
    drop_next: AtomicUsize,
    next_port: AtomicU16,
}

/// An in-process datagram network.
///
/// Endpoints are addressed by `SocketAddr` like real sockets. Datagrams to
/// an unbound address vanish, as they would over UDP. Clones share the
/// same network.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// An empty network with no bound endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                mailboxes: DashMap::new(),
                partitioned: DashSet::new(),
                drop_next: AtomicUsize::new(0),
                next_port: AtomicU16::new(40_000),
            }),
        }
    }

    /// Bind an endpoint at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] if the address is already bound.
    pub fn bind(&self, addr: SocketAddr) -> Result<MemoryTransport, NetError> {
        match self.inner.mailboxes.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NetError::Bind {
                addr,
                source: io::Error::from(io::ErrorKind::AddrInUse),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(VecDeque::new());
                Ok(MemoryTransport {
                    addr,
                    network: self.clone(),
                })
            }
        }
    }

    /// Bind an endpoint on a fresh loopback port.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] if every port has been handed out.
    pub fn bind_any(&self) -> Result<MemoryTransport, NetError> {
        loop {
            let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            match self.bind(addr) {
                Err(NetError::Bind { .. }) if port != u16::MAX => continue,
                result => return result,
            }
        }
    }

    /// Silently drop every datagram to or from `addr` until healed.
    pub fn partition(&self, addr: SocketAddr) {
        self.inner.partitioned.insert(addr);
    }

    /// Undo [`partition`](Self::partition).
    pub fn heal(&self, addr: SocketAddr) {
        self.inner.partitioned.remove(&addr);
    }

    /// Drop the next `count` datagrams sent anywhere on the network.
    pub fn drop_next(&self, count: usize) {
        self.inner.drop_next.fetch_add(count, Ordering::Relaxed);
    }

    /// Datagrams delivered but not yet received, across all endpoints.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.mailboxes.iter().map(|m| m.len()).sum()
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, datagram: Vec<u8>) {
        let inner = &self.inner;
        if inner.partitioned.contains(&from) || inner.partitioned.contains(&to) {
            trace!(%from, %to, "datagram lost to partition");
            return;
        }
        let dropped = inner
            .drop_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            trace!(%from, %to, "datagram dropped");
            return;
        }
        if let Some(mut mailbox) = inner.mailboxes.get_mut(&to) {
            mailbox.push_back((from, datagram));
        }
    }
}

/// One endpoint of a [`MemoryNetwork`]. Unbinds on drop.
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// The network this endpoint is bound on.
    #[must_use]
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn try_recv(&mut self) -> Result<Option<(SocketAddr, Vec<u8>)>, NetError> {
        let mut mailbox = self
            .network
            .inner
            .mailboxes
            .get_mut(&self.addr)
            .ok_or(NetError::TransportClosed)?;
        Ok(mailbox.pop_front())
    }

    fn send(&mut self, addr: SocketAddr, datagram: Vec<u8>) -> Result<(), NetError> {
        self.network.deliver(self.addr, addr, datagram);
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.inner.mailboxes.remove(&self.addr);
    }
}
