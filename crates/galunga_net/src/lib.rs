//! # galunga_net
//!
//! Datagram networking that funnels remote traffic into the event bus.
//!
//! This crate provides:
//!
//! - [`transport`]: the non-blocking [`Transport`] trait, a threaded
//!   [`UdpTransport`], and an in-process [`MemoryNetwork`].
//! - [`packet`]: the MessagePack datagram format.
//! - [`channel`] / [`connection`]: sequencing, reliability, heartbeats and
//!   timeouts for one remote.
//! - [`server`]: the [`NetworkServer`] peer manager.
//! - [`client`]: the [`NetworkHost`] link to a server.
//! - [`message`]: the [`Message`] trait and the tag registry.
//! - [`outbox`]: the [`Outbox`] handle for queueing outgoing messages.
//! - [`events`]: connection lifecycle events published on the bus.
//!
//! Everything except the UDP I/O thread runs on the caller's thread; the
//! bus is only ever touched from `poll`.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod message;
pub mod outbox;
pub mod packet;
pub mod peer;
pub mod server;
pub mod transport;

pub use client::NetworkHost;
pub use codec::{decode, encode};
pub use config::NetConfig;
pub use connection::{Connection, DisconnectReason, LinkState};
pub use error::NetError;
pub use events::{FromPeer, PeerConnected, PeerDisconnected, ServerConnected, ServerDisconnected};
pub use message::{Message, MessageRegistry, MessageTypeId};
pub use outbox::{Outbox, Target};
pub use packet::{Channel, Packet, SessionId};
pub use peer::{Peer, PeerId};
pub use server::{NetworkServer, PollStats};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};
