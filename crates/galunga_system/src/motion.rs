//! Velocity integration.

use anyhow::Result;
use galunga_math::Transform;

use crate::components::Velocity;
use crate::context::TickContext;
use crate::schedule::System;

/// Moves every entity with a [`Velocity`] by `linear * dt`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MotionSystem;

impl System for MotionSystem {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Result<()> {
        let dt = ctx.dt;
        ctx.scene
            .each2_mut::<Transform, Velocity>(|_, transform, velocity| {
                transform.translation += velocity.linear * dt;
            });
        Ok(())
    }
}
