//! # galunga_math
//!
//! 2D math types for the simulation. Re-exports [`glam`] for linear algebra
//! and defines the spatial types systems share.

pub mod bounds;
pub mod transform;

// Re-export glam types for convenience.
pub use glam::{Mat3, Vec2};

pub use bounds::Aabb;
pub use transform::Transform;
