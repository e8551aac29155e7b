//! # galunga_system
//!
//! The per-tick game logic. Every system implements [`System`] and is run by
//! a [`Schedule`] once per fixed simulation step with a [`TickContext`].
//!
//! The standard schedule runs, in order:
//!
//! 1. [`MotionSystem`]: integrates [`Velocity`] into `Transform`.
//! 2. [`CollisionSystem`]: reports overlapping [`Collider`]s as [`Collision`].
//! 3. [`LifetimeSystem`]: destroys entities whose [`Lifetime`] ran out.
//!
//! ```rust
//! use galunga_bus::EventBus;
//! use galunga_scene::{Commands, Scene};
//! use galunga_system::{CollisionConfig, Schedule};
//!
//! let bus = EventBus::new();
//! let mut scene = Scene::new(&bus);
//! let commands = Commands::new();
//! let mut schedule = Schedule::standard(CollisionConfig::default());
//! schedule.run(1, 1.0 / 60.0, &mut scene, &bus, &commands).unwrap();
//! ```

pub mod collision;
pub mod components;
pub mod config;
pub mod context;
pub mod events;
pub mod lifetime;
pub mod motion;
pub mod schedule;

pub use collision::CollisionSystem;
pub use components::{Collider, Lifetime, Sprite, Velocity};
pub use config::{CollisionConfig, ContactPolicy};
pub use context::TickContext;
pub use events::{AddSprite, Collision, CollisionEnded, Expired};
pub use lifetime::LifetimeSystem;
pub use motion::MotionSystem;
pub use schedule::{Schedule, System};
