//! Network-layer error types.

use std::net::SocketAddr;

use crate::peer::PeerId;

/// Errors that can occur during network operations.
///
/// Failures of a single peer never surface here; they disconnect that peer
/// and are reported on the event bus instead.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket or runtime I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode a value to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a value from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The transport's I/O thread has stopped.
    #[error("transport closed")]
    TransportClosed,

    /// No live peer has this id.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}
