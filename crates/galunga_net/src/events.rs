//! Events the network layer publishes on the bus.

use std::net::SocketAddr;

use crate::connection::DisconnectReason;
use crate::peer::PeerId;

/// A peer completed the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConnected {
    pub peer: PeerId,
    pub addr: SocketAddr,
}

/// A peer left the live set. Nothing from it is dispatched afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDisconnected {
    pub peer: PeerId,
    pub addr: SocketAddr,
    pub reason: DisconnectReason,
}

/// A message received by the server, tagged with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct FromPeer<M> {
    pub peer: PeerId,
    pub message: M,
}

/// The client's handshake completed; the server knows it as `peer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConnected {
    pub peer: PeerId,
}

/// The client lost (or never got) its connection to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerDisconnected {
    pub reason: DisconnectReason,
}
