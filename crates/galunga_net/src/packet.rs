//! The datagram format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec;
use crate::error::NetError;
use crate::message::MessageTypeId;
use crate::peer::PeerId;

/// Delivery guarantee for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// May be lost; never delivered out of order (stale arrivals are
    /// dropped).
    Unreliable,
    /// Retransmitted until acknowledged; delivered exactly once, in order.
    Reliable,
}

/// Random nonce identifying one connection attempt of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// A fresh random session id.
    #[must_use]
    pub fn random() -> Self {
        let bits = Uuid::new_v4().as_u128();
        Self((bits >> 64) as u64 ^ bits as u64)
    }
}

/// One datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    /// Client asks to join.
    Connect { session: SessionId },
    /// Server admits the client under `peer`.
    Accept { session: SessionId, peer: PeerId },
    /// Either side ends the connection (or the server refuses it).
    Disconnect,
    /// Keep-alive, sent when nothing else has been sent for a while.
    Heartbeat,
    /// Acknowledges one reliable message.
    Ack { sequence: u64 },
    /// A tagged application message.
    Message {
        channel: Channel,
        sequence: u64,
        tag: MessageTypeId,
        payload: Vec<u8>,
    },
}

impl Packet {
    /// Encode to a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if serialisation fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetError> {
        codec::encode(self)
    }

    /// Decode a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Decode`] for anything that is not a packet.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetError> {
        codec::decode(bytes)
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Accept { .. } => "accept",
            Self::Disconnect => "disconnect",
            Self::Heartbeat => "heartbeat",
            Self::Ack { .. } => "ack",
            Self::Message { .. } => "message",
        }
    }
}
