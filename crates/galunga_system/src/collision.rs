//! Axis-aligned overlap detection.
//!
//! Candidates are every entity with both a `Transform` and a [`Collider`],
//! sorted by entity so the pairwise scan and the order of published events
//! are deterministic. World bounds ignore rotation.

use std::collections::BTreeSet;

use anyhow::Result;
use galunga_component::Entity;
use galunga_math::{Aabb, Transform};
use tracing::trace;

use crate::components::Collider;
use crate::config::{CollisionConfig, ContactPolicy};
use crate::context::TickContext;
use crate::events::{Collision, CollisionEnded};
use crate::schedule::System;

/// Publishes [`Collision`] for overlapping colliders and
/// [`CollisionEnded`] when a reported pair separates.
#[derive(Debug, Default)]
pub struct CollisionSystem {
    config: CollisionConfig,
    /// Pairs overlapping as of the last update, `entity0 < entity1`.
    contacts: BTreeSet<(Entity, Entity)>,
}

impl CollisionSystem {
    /// A system with no known contacts.
    #[must_use]
    pub fn new(config: CollisionConfig) -> Self {
        Self {
            config,
            contacts: BTreeSet::new(),
        }
    }

    /// Number of pairs currently in contact.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Returns `true` if the pair overlapped at the last update.
    #[must_use]
    pub fn in_contact(&self, a: Entity, b: Entity) -> bool {
        let pair = Collision::new(a, b);
        self.contacts.contains(&(pair.entity0, pair.entity1))
    }
}

/// All strictly overlapping pairs among `candidates`, which must be sorted
/// by entity.
fn overlapping_pairs(candidates: &[(Entity, Aabb)]) -> BTreeSet<(Entity, Entity)> {
    let mut pairs = BTreeSet::new();
    for (i, (a, bounds_a)) in candidates.iter().enumerate() {
        for (b, bounds_b) in &candidates[i + 1..] {
            if bounds_a.overlaps(bounds_b) {
                pairs.insert((*a, *b));
            }
        }
    }
    pairs
}

impl System for CollisionSystem {
    fn name(&self) -> &'static str {
        "collision"
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Result<()> {
        let mut candidates: Vec<(Entity, Aabb)> = ctx
            .scene
            .iter2::<Transform, Collider>()
            .map(|(entity, transform, collider)| (entity, collider.bounds.transformed(transform)))
            .collect();
        candidates.sort_unstable_by_key(|(entity, _)| *entity);

        let current = overlapping_pairs(&candidates);

        let ended: Vec<_> = self
            .contacts
            .difference(&current)
            .filter(|(a, b)| ctx.scene.contains(*a) && ctx.scene.contains(*b))
            .copied()
            .collect();
        let reported: Vec<_> = match self.config.policy {
            ContactPolicy::OnEnter => current.difference(&self.contacts).copied().collect(),
            ContactPolicy::Continuous => current.iter().copied().collect(),
        };
        self.contacts = current;

        for (entity0, entity1) in ended {
            trace!(tick_id = ctx.tick_id, %entity0, %entity1, "collision ended");
            ctx.bus.publish(CollisionEnded { entity0, entity1 });
        }
        for (entity0, entity1) in reported {
            trace!(tick_id = ctx.tick_id, %entity0, %entity1, "collision");
            ctx.bus.publish(Collision { entity0, entity1 });
        }
        Ok(())
    }
}
