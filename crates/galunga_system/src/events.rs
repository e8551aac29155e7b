//! Events published by the standard systems.

use galunga_component::Entity;
use serde::{Deserialize, Serialize};

/// Two colliders started overlapping (or, under
/// [`ContactPolicy::Continuous`](crate::ContactPolicy), are still
/// overlapping). Always `entity0 < entity1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collision {
    pub entity0: Entity,
    pub entity1: Entity,
}

impl Collision {
    /// Build a collision with the pair in canonical order.
    #[must_use]
    pub fn new(a: Entity, b: Entity) -> Self {
        let (entity0, entity1) = if a <= b { (a, b) } else { (b, a) };
        Self { entity0, entity1 }
    }

    /// Returns `true` if `entity` is one side of the pair.
    #[must_use]
    pub fn involves(&self, entity: Entity) -> bool {
        self.entity0 == entity || self.entity1 == entity
    }
}

/// A previously reported pair no longer overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollisionEnded {
    pub entity0: Entity,
    pub entity1: Entity,
}

/// An entity's lifetime ran out and it has been destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expired {
    pub entity: Entity,
}

/// Ask the frontend to load a sprite texture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSprite {
    pub path: String,
}
