//! Components the standard systems read and write.

use galunga_component::Component;
use galunga_math::Aabb;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Local collision bounds, placed in the world by the entity's `Transform`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub bounds: Aabb,
}

impl Collider {
    /// A collider with the given local bounds.
    #[must_use]
    pub fn new(bounds: Aabb) -> Self {
        Self { bounds }
    }
}

impl Component for Collider {
    fn type_name() -> &'static str {
        "Collider"
    }
}

/// Seconds until the entity is destroyed by the lifetime system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lifetime {
    pub remaining: f32,
}

impl Lifetime {
    /// An entity that lives for `seconds` more.
    #[must_use]
    pub fn new(seconds: f32) -> Self {
        Self { remaining: seconds }
    }

    /// Returns `true` once no time is left.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining <= 0.0
    }
}

impl Component for Lifetime {
    fn type_name() -> &'static str {
        "Lifetime"
    }
}

/// Linear velocity in world units per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: Vec2,
}

impl Velocity {
    /// Move at `linear` units per second.
    #[must_use]
    pub fn new(linear: Vec2) -> Self {
        Self { linear }
    }
}

impl Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}

/// Index of the texture the frontend draws for this entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprite {
    pub index: u32,
}

impl Component for Sprite {
    fn type_name() -> &'static str {
        "Sprite"
    }
}
