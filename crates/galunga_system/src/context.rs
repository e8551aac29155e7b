//! Per-tick execution context provided to systems.

use galunga_bus::EventBus;
use galunga_scene::{Commands, Scene};

/// Everything a system may touch during one fixed step.
///
/// References are only valid for the duration of the call, so a system
/// cannot hold on to component data across ticks.
pub struct TickContext<'a> {
    /// The current tick ID (starts at 1).
    pub tick_id: u64,
    /// Fixed step duration, in seconds.
    pub dt: f32,
    /// The scene being simulated.
    pub scene: &'a mut Scene,
    /// The bus systems publish their events on.
    pub bus: &'a EventBus,
    /// Structural changes to apply once every system has run.
    pub commands: &'a Commands,
}

impl<'a> TickContext<'a> {
    /// Create a new context for a tick.
    #[must_use]
    pub fn new(
        tick_id: u64,
        dt: f32,
        scene: &'a mut Scene,
        bus: &'a EventBus,
        commands: &'a Commands,
    ) -> Self {
        Self {
            tick_id,
            dt,
            scene,
            bus,
            commands,
        }
    }
}
