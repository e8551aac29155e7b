//! Structural events published by the [`Scene`](crate::Scene).

use galunga_component::{ComponentTypeId, Entity};

/// Published after an entity has been created.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreated {
    pub entity: Entity,
    pub name: String,
}

/// Published after an entity and all of its components have been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDestroyed {
    pub entity: Entity,
}

/// Published when an entity gains a component it did not have before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentAdded {
    pub entity: Entity,
    pub component: ComponentTypeId,
    pub name: &'static str,
}

/// Published when a component is detached, including when its entity is
/// destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentRemoved {
    pub entity: Entity,
    pub component: ComponentTypeId,
    pub name: &'static str,
}
