//! # galunga_app
//!
//! Ties the simulation crates together into runnable applications.
//!
//! - [`tick`]: [`TickConfig`] and the [`FixedTimestep`] accumulator.
//! - [`simulation`]: [`Simulation`], the scene and schedule advanced in
//!   fixed steps.
//! - [`server`]: [`ServerApplication`], one tick per loop iteration over a
//!   [`NetworkServer`](galunga_net::NetworkServer).
//! - [`client`]: [`ClientApplication`], frame-driven with a [`Frontend`],
//!   an [`InputSource`] and an optional
//!   [`NetworkHost`](galunga_net::NetworkHost).
//! - [`protocol`]: the game messages exchanged between the two.
//! - [`config`]: [`AppConfig`], loaded from JSON and the environment.
//!
//! Both binaries follow the same shape: build the bus, the transport and
//! the application, then call `run()`.

pub mod client;
pub mod config;
pub mod demo;
pub mod frontend;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod simulation;
pub mod tick;

pub use client::{ClientApplication, ServerLog};
pub use config::AppConfig;
pub use demo::DemoScene;
pub use frontend::{Frontend, HeadlessFrontend, InputSource, Key, NullInput, SpawnInput};
pub use protocol::{ServerCollision, ServerExpired, SpawnRequest, Welcome};
pub use server::ServerApplication;
pub use shutdown::ShutdownFlag;
pub use simulation::Simulation;
pub use tick::{FixedTimestep, TickConfig};
