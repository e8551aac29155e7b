//! Game messages exchanged between client and server.
//!
//! Entity ids in server-originated messages belong to the server's scene
//! and are never looked up in the client's.

use galunga_component::Entity;
use galunga_net::{Message, NetworkHost, NetworkServer, PeerId};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Client asks the server to spawn a short-lived collider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub translation: Vec2,
    /// Seconds until the spawned entity expires.
    pub ttl: f32,
}

impl Message for SpawnRequest {
    fn type_name() -> &'static str {
        "SpawnRequest"
    }
}

/// Sent to each peer once it is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub peer: PeerId,
    /// Server tick at the time of the handshake.
    pub tick: u64,
}

impl Message for Welcome {
    fn type_name() -> &'static str {
        "Welcome"
    }
}

/// A collision in the server's scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCollision {
    pub entity0: Entity,
    pub entity1: Entity,
    pub tick: u64,
}

impl Message for ServerCollision {
    fn type_name() -> &'static str {
        "ServerCollision"
    }
}

/// An entity in the server's scene expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerExpired {
    pub entity: Entity,
    pub tick: u64,
}

impl Message for ServerExpired {
    fn type_name() -> &'static str {
        "ServerExpired"
    }
}

/// Messages the server accepts from clients.
pub fn register_server_messages(server: &mut NetworkServer) {
    server.register::<SpawnRequest>();
}

/// Messages the client accepts from the server.
pub fn register_client_messages(host: &mut NetworkHost) {
    host.register::<Welcome>();
    host.register::<ServerCollision>();
    host.register::<ServerExpired>();
}
