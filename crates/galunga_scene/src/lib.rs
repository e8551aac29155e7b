//! # galunga_scene
//!
//! The [`Scene`] is the aggregate root of the simulation: it owns the entity
//! set and every component storage, and announces structural changes on the
//! event bus.
//!
//! This crate provides:
//!
//! - [`Scene`]: entity/component store with typed queries.
//! - [`Commands`]: structural changes recorded now and applied at end of tick.
//! - [`Name`]: the debug name every entity is created with.
//! - [`events`]: lifecycle events published by the scene.

pub mod commands;
pub mod error;
pub mod events;
pub mod name;
pub mod scene;

pub use commands::Commands;
pub use error::SceneError;
pub use events::{ComponentAdded, ComponentRemoved, EntityCreated, EntityDestroyed};
pub use name::Name;
pub use scene::Scene;
