//! The simulation core shared by client and server.

use std::time::Duration;

use anyhow::Result;
use galunga_bus::EventBus;
use galunga_scene::{Commands, Scene};
use galunga_system::{CollisionConfig, Schedule};
use tracing::debug;

use crate::tick::{FixedTimestep, TickConfig};

/// Scene, schedule and fixed-timestep clock, advanced one tick at a time.
pub struct Simulation {
    bus: EventBus,
    scene: Scene,
    commands: Commands,
    schedule: Schedule,
    clock: FixedTimestep,
    tick_id: u64,
}

impl Simulation {
    /// Build a simulation running the standard schedule.
    #[must_use]
    pub fn new(bus: &EventBus, tick: &TickConfig, collision: CollisionConfig) -> Self {
        Self::with_schedule(bus, tick, Schedule::standard(collision))
    }

    /// Build a simulation running `schedule` instead of the standard one.
    #[must_use]
    pub fn with_schedule(bus: &EventBus, tick: &TickConfig, schedule: Schedule) -> Self {
        Self {
            bus: bus.clone(),
            scene: Scene::new(bus),
            commands: Commands::new(),
            schedule,
            clock: FixedTimestep::from_config(tick),
            tick_id: 0,
        }
    }

    /// Returns a reference to the event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns a reference to the scene.
    #[must_use]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Returns a mutable reference to the scene.
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Queue shared with event handlers; applied at the end of every step.
    #[must_use]
    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    /// Returns a reference to the fixed-timestep clock.
    #[must_use]
    pub fn clock(&self) -> &FixedTimestep {
        &self.clock
    }

    /// Id of the last completed step (0 before the first).
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Run exactly one fixed step: every system in order, then the
    /// deferred commands. Returns the new tick id.
    ///
    /// # Errors
    ///
    /// Returns the first system or command failure; the tick still counts.
    pub fn step(&mut self) -> Result<u64> {
        self.tick_id += 1;
        self.schedule.run(
            self.tick_id,
            self.clock.tick_secs(),
            &mut self.scene,
            &self.bus,
            &self.commands,
        )?;
        Ok(self.tick_id)
    }

    /// Feed `dt` of wall-clock time into the clock and run every whole
    /// tick it yields. `before_step` runs ahead of each step; it is where
    /// input and the network are polled.
    ///
    /// # Errors
    ///
    /// Stops at the first error from `before_step` or a step.
    pub fn advance<F>(&mut self, dt: Duration, before_step: F) -> Result<u32>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        self.advance_at_most(dt, u32::MAX, before_step)
    }

    /// Like [`advance`](Self::advance), but run no more than `limit` steps.
    /// Whole ticks beyond the limit stay in the accumulator.
    ///
    /// # Errors
    ///
    /// Stops at the first error from `before_step` or a step.
    pub fn advance_at_most<F>(&mut self, dt: Duration, limit: u32, mut before_step: F) -> Result<u32>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        self.clock.accumulate(dt);
        let mut steps = 0;
        while steps < limit && self.clock.consume() {
            before_step(self)?;
            self.step()?;
            steps += 1;
        }
        if steps > 0 {
            debug!(tick_id = self.tick_id, steps, alpha = self.clock.alpha(), "simulation advanced");
        }
        Ok(steps)
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick_id", &self.tick_id)
            .field("entities", &self.scene.entity_count())
            .field("pending_commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}
