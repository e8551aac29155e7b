//! Server-side view of a remote client.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::config::NetConfig;
use crate::connection::{Connection, LinkState};
use crate::packet::SessionId;

/// Server-assigned peer identifier. Never reused within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A live peer: its identity and connection state.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    session: SessionId,
    pub(crate) connection: Connection,
}

impl Peer {
    /// A peer that has just sent its first connect.
    pub(crate) fn new(id: PeerId, addr: SocketAddr, session: SessionId, config: &NetConfig) -> Self {
        Self {
            id,
            session,
            connection: Connection::new(addr, config),
        }
    }

    /// Id assigned by the server.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Address the peer sends from.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.connection.addr()
    }

    /// Session id the peer connected with.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.connection.state()
    }

    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }
}
