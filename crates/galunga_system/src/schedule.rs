//! The [`System`] trait and the [`Schedule`] that runs systems each tick.

use anyhow::{Context, Result};
use galunga_bus::EventBus;
use galunga_scene::{Commands, Scene};
use tracing::debug;

use crate::collision::CollisionSystem;
use crate::config::CollisionConfig;
use crate::context::TickContext;
use crate::lifetime::LifetimeSystem;
use crate::motion::MotionSystem;

/// A unit of per-tick game logic.
pub trait System {
    /// Human-readable system name (e.g. `"collision"`).
    fn name(&self) -> &'static str;

    /// Advance the system by one fixed step.
    ///
    /// # Errors
    ///
    /// An error aborts the tick and is propagated out of [`Schedule::run`].
    fn update(&mut self, ctx: &mut TickContext<'_>) -> Result<()>;
}

/// An ordered list of systems.
#[derive(Default)]
pub struct Schedule {
    systems: Vec<Box<dyn System>>,
}

impl Schedule {
    /// An empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Motion, then collision, then lifetime.
    #[must_use]
    pub fn standard(collision: CollisionConfig) -> Self {
        Self::new()
            .with_system(MotionSystem)
            .with_system(CollisionSystem::new(collision))
            .with_system(LifetimeSystem)
    }

    /// Append a system; it runs after every system already added.
    #[must_use]
    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.add(system);
        self
    }

    /// Append a system in place.
    pub fn add(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    /// System names in run order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.systems.iter().map(|s| s.name())
    }

    /// Number of systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if the schedule has no systems.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Run every system once, in order, then apply the deferred commands.
    ///
    /// Returns the number of deferred commands applied.
    ///
    /// # Errors
    ///
    /// Returns the first system error, or the first failing deferred command.
    pub fn run(
        &mut self,
        tick_id: u64,
        dt: f32,
        scene: &mut Scene,
        bus: &EventBus,
        commands: &Commands,
    ) -> Result<usize> {
        let mut ctx = TickContext::new(tick_id, dt, scene, bus, commands);
        for system in &mut self.systems {
            system
                .update(&mut ctx)
                .with_context(|| format!("system `{}` failed on tick {tick_id}", system.name()))?;
        }
        let applied = scene
            .apply(commands)
            .with_context(|| format!("deferred commands failed on tick {tick_id}"))?;
        debug!(tick_id, systems = self.systems.len(), applied, "schedule ran");
        Ok(applied)
    }
}
