//! 2D transform component.
//!
//! [`Transform`] represents translation, rotation, and scale in the plane.
//! Nearly every simulated entity has one.

use galunga_component::Component;
use glam::{Mat3, Vec2};
use serde::{Deserialize, Serialize};

/// A 2D transform: translation, rotation in radians, and per-axis scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    /// World-space position.
    pub translation: Vec2,
    /// Counter-clockwise rotation in radians.
    pub rotation: f32,
    /// Per-axis scale factor.
    pub scale: Vec2,
}

impl Transform {
    /// The identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        translation: Vec2::ZERO,
        rotation: 0.0,
        scale: Vec2::ONE,
    };

    /// Create a transform at `translation` with default rotation/scale.
    #[must_use]
    pub fn from_translation(translation: Vec2) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Replace the scale.
    #[must_use]
    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    /// Replace the rotation.
    #[must_use]
    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    /// Translate the transform by the given offset.
    #[must_use]
    pub fn translated(mut self, offset: Vec2) -> Self {
        self.translation += offset;
        self
    }

    /// Compute the 3×3 model matrix for this transform.
    #[must_use]
    pub fn to_matrix(&self) -> Mat3 {
        Mat3::from_scale_angle_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Component for Transform {
    fn type_name() -> &'static str {
        "Transform"
    }
}
