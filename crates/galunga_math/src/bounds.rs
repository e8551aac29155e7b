//! Axis-aligned bounding boxes.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::transform::Transform;

/// An axis-aligned rectangle given by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    /// The unit square centred on the origin.
    pub const UNIT: Self = Self {
        min: Vec2::splat(-0.5),
        max: Vec2::splat(0.5),
    };

    /// Create bounds from two corners in any order.
    #[must_use]
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create bounds from a centre point and half extents.
    #[must_use]
    pub fn from_center_half_extents(center: Vec2, half_extents: Vec2) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// Centre point of the box.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// Width and height of the box.
    #[must_use]
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// Place local bounds in the world: scale by `transform.scale`, then
    /// offset by `transform.translation`. Rotation is ignored.
    #[must_use]
    pub fn transformed(&self, transform: &Transform) -> Self {
        Self::new(
            self.min * transform.scale + transform.translation,
            self.max * transform.scale + transform.translation,
        )
    }

    /// Strict overlap test: boxes that only share an edge do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// Returns `true` if `point` lies inside or on the edge.
    #[must_use]
    pub fn contains_point(&self, point: Vec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::UNIT
    }
}
