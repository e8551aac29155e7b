//! Entity and component storage for the simulation.
//!
//! The [`Scene`] holds the entity allocator and one sparse-set storage per
//! component type. Storages are kept in registration order so that anything
//! derived from walking them (removal events on destroy, for instance) is
//! deterministic on client and server alike.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use galunga_bus::EventBus;
use galunga_component::{
    Component, ComponentStorage, ComponentTypeId, Entity, EntityAllocator, ErasedStorage,
    NamedStorage,
};
use tracing::{debug, trace};

use crate::commands::Commands;
use crate::error::SceneError;
use crate::events::{ComponentAdded, ComponentRemoved, EntityCreated, EntityDestroyed};
use crate::name::Name;

/// The simulation's entity/component store.
pub struct Scene {
    bus: EventBus,
    allocator: EntityAllocator,
    /// One storage per component type, in the order types were first used.
    storages: Vec<Box<dyn ErasedStorage>>,
    /// Position of each component type in `storages`.
    index: HashMap<TypeId, usize>,
}

impl Scene {
    /// Create an empty scene that announces changes on `bus`.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            allocator: EntityAllocator::new(),
            storages: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The bus this scene publishes on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ── Entities ────────────────────────────────────────────────────────────

    /// Create an entity carrying a [`Name`] component.
    pub fn create_entity(&mut self, name: impl Into<String>) -> Entity {
        let name = name.into();
        let entity = self.allocator.allocate();
        self.storage_or_insert::<Name>()
            .insert(entity, Name::new(name.clone()));
        debug!(%entity, name = %name, "entity created");
        self.bus.publish(EntityCreated { entity, name });
        entity
    }

    /// Destroy an entity and every component attached to it.
    ///
    /// Publishes one [`ComponentRemoved`] per component, then
    /// [`EntityDestroyed`].
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NoSuchEntity`] if the entity is not alive.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), SceneError> {
        self.ensure_alive(entity)?;
        let removed: Vec<&'static str> = self
            .storages
            .iter_mut()
            .filter_map(|storage| {
                storage
                    .remove_entity(entity)
                    .then(|| storage.component_name())
            })
            .collect();
        self.allocator.free(entity);
        debug!(%entity, components = removed.len(), "entity destroyed");

        for name in removed {
            self.bus.publish(ComponentRemoved {
                entity,
                component: ComponentTypeId::from_name(name),
                name,
            });
        }
        self.bus.publish(EntityDestroyed { entity });
        Ok(())
    }

    /// Returns `true` if `entity` is alive.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.allocator.len()
    }

    /// Iterates over all live entities.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.allocator.iter()
    }

    /// The name the entity was created with.
    #[must_use]
    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.get_component::<Name>(entity).map(|n| n.value.as_str())
    }

    fn ensure_alive(&self, entity: Entity) -> Result<(), SceneError> {
        if self.allocator.is_alive(entity) {
            Ok(())
        } else {
            Err(SceneError::NoSuchEntity(entity))
        }
    }

    // ── Components ──────────────────────────────────────────────────────────

    /// Attach `value` to `entity`, replacing any existing `T`.
    ///
    /// Publishes [`ComponentAdded`] only when the entity did not already have
    /// a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NoSuchEntity`] if the entity is not alive.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<&mut T, SceneError> {
        self.ensure_alive(entity)?;
        let replaced = self.storage_or_insert::<T>().insert(entity, value).is_some();
        if !replaced {
            trace!(%entity, component = T::type_name(), "component added");
            self.bus.publish(ComponentAdded {
                entity,
                component: T::component_type_id(),
                name: T::type_name(),
            });
        }
        self.get_component_mut::<T>(entity)
            .ok_or(SceneError::NoSuchEntity(entity))
    }

    /// Detach and return the entity's `T`, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NoSuchEntity`] if the entity is not alive.
    pub fn remove_component<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<Option<T>, SceneError> {
        self.ensure_alive(entity)?;
        let removed = self.storage_mut::<T>().and_then(|s| s.remove(entity));
        if removed.is_some() {
            trace!(%entity, component = T::type_name(), "component removed");
            self.bus.publish(ComponentRemoved {
                entity,
                component: T::component_type_id(),
                name: T::type_name(),
            });
        }
        Ok(removed)
    }

    /// Get the entity's `T`. Absent for destroyed entities.
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    /// Get the entity's `T` mutably. Absent for destroyed entities.
    #[must_use]
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Returns `true` if the entity has a `T`.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.storage::<T>().is_some_and(|s| s.contains(entity))
    }

    /// Returns the number of entities with a `T`.
    #[must_use]
    pub fn component_count<T: Component>(&self) -> usize {
        self.storage::<T>().map_or(0, ComponentStorage::len)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Lazily iterate every entity with an `A`.
    pub fn iter<A: Component>(&self) -> impl Iterator<Item = (Entity, &A)> + '_ {
        self.storage::<A>().into_iter().flat_map(|s| s.iter())
    }

    /// Lazily iterate every entity with both an `A` and a `B`.
    pub fn iter2<A: Component, B: Component>(
        &self,
    ) -> impl Iterator<Item = (Entity, &A, &B)> + '_ {
        self.storage::<A>()
            .zip(self.storage::<B>())
            .into_iter()
            .flat_map(|(a, b)| {
                a.iter()
                    .filter_map(move |(entity, va)| b.get(entity).map(|vb| (entity, va, vb)))
            })
    }

    /// Call `f` for every entity with an `A`.
    pub fn each<A: Component>(&self, mut f: impl FnMut(Entity, &A)) {
        for (entity, a) in self.iter::<A>() {
            f(entity, a);
        }
    }

    /// Call `f` for every entity with an `A` and a `B`.
    pub fn each2<A: Component, B: Component>(&self, mut f: impl FnMut(Entity, &A, &B)) {
        for (entity, a, b) in self.iter2::<A, B>() {
            f(entity, a, b);
        }
    }

    /// Call `f` for every entity with an `A`, a `B` and a `C`.
    pub fn each3<A: Component, B: Component, C: Component>(
        &self,
        mut f: impl FnMut(Entity, &A, &B, &C),
    ) {
        let Some(c) = self.storage::<C>() else {
            return;
        };
        for (entity, a, b) in self.iter2::<A, B>() {
            if let Some(vc) = c.get(entity) {
                f(entity, a, b, vc);
            }
        }
    }

    /// Call `f` with mutable access to every entity's `A`.
    pub fn each_mut<A: Component>(&mut self, mut f: impl FnMut(Entity, &mut A)) {
        if let Some(a) = self.storage_mut::<A>() {
            for (entity, va) in a.iter_mut() {
                f(entity, va);
            }
        }
    }

    /// Call `f` with mutable access to every entity having an `A` and a `B`.
    ///
    /// # Panics
    ///
    /// Panics if `A` and `B` are the same type.
    pub fn each2_mut<A: Component, B: Component>(
        &mut self,
        mut f: impl FnMut(Entity, &mut A, &mut B),
    ) {
        assert_ne!(
            TypeId::of::<A>(),
            TypeId::of::<B>(),
            "each2_mut::<{0}, {0}> would alias",
            A::type_name()
        );
        let (Some(ia), Some(ib)) = (self.slot::<A>(), self.slot::<B>()) else {
            return;
        };
        let Ok([sa, sb]) = self.storages.get_disjoint_mut([ia, ib]) else {
            return;
        };
        let (Some(a), Some(b)) = (downcast_mut::<A>(sa), downcast_mut::<B>(sb)) else {
            return;
        };
        for (entity, va) in a.iter_mut() {
            if let Some(vb) = b.get_mut(entity) {
                f(entity, va, vb);
            }
        }
    }

    /// Call `f` with mutable access to every entity having an `A`, a `B` and
    /// a `C`.
    ///
    /// # Panics
    ///
    /// Panics if any two of the requested types are the same.
    pub fn each3_mut<A: Component, B: Component, C: Component>(
        &mut self,
        mut f: impl FnMut(Entity, &mut A, &mut B, &mut C),
    ) {
        let ids = [TypeId::of::<A>(), TypeId::of::<B>(), TypeId::of::<C>()];
        assert!(
            ids[0] != ids[1] && ids[0] != ids[2] && ids[1] != ids[2],
            "each3_mut::<{}, {}, {}> would alias",
            A::type_name(),
            B::type_name(),
            C::type_name()
        );
        let (Some(ia), Some(ib), Some(ic)) = (self.slot::<A>(), self.slot::<B>(), self.slot::<C>())
        else {
            return;
        };
        let Ok([sa, sb, sc]) = self.storages.get_disjoint_mut([ia, ib, ic]) else {
            return;
        };
        let (Some(a), Some(b), Some(c)) = (
            downcast_mut::<A>(sa),
            downcast_mut::<B>(sb),
            downcast_mut::<C>(sc),
        ) else {
            return;
        };
        for (entity, va) in a.iter_mut() {
            if let (Some(vb), Some(vc)) = (b.get_mut(entity), c.get_mut(entity)) {
                f(entity, va, vb, vc);
            }
        }
    }

    // ── Deferred changes ────────────────────────────────────────────────────

    /// Run every command queued in `commands`, including commands queued by
    /// the commands themselves. Returns how many ran.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing command's error; commands
    /// queued after it stay queued.
    pub fn apply(&mut self, commands: &Commands) -> Result<usize, SceneError> {
        let mut applied = 0;
        while let Some(command) = commands.pop() {
            command(self)?;
            applied += 1;
        }
        if applied > 0 {
            trace!(applied, "applied deferred commands");
        }
        Ok(applied)
    }

    // ── Storage plumbing ────────────────────────────────────────────────────

    fn slot<T: Component>(&self) -> Option<usize> {
        self.index.get(&TypeId::of::<T>()).copied()
    }

    fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        let storage = self.storages.get(self.slot::<T>()?)?;
        storage
            .as_any()
            .downcast_ref::<NamedStorage<T>>()
            .map(|named| &named.storage)
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        let slot = self.slot::<T>()?;
        downcast_mut::<T>(self.storages.get_mut(slot)?)
    }

    fn storage_or_insert<T: Component>(&mut self) -> &mut ComponentStorage<T> {
        let slot = match self.slot::<T>() {
            Some(slot) => slot,
            None => {
                self.storages.push(Box::new(NamedStorage {
                    name: T::type_name(),
                    storage: ComponentStorage::<T>::new(),
                }));
                let slot = self.storages.len() - 1;
                self.index.insert(TypeId::of::<T>(), slot);
                slot
            }
        };
        match downcast_mut::<T>(&mut self.storages[slot]) {
            Some(storage) => storage,
            None => unreachable!("storage slot for {} holds another type", T::type_name()),
        }
    }
}

fn downcast_mut<T: 'static>(storage: &mut Box<dyn ErasedStorage>) -> Option<&mut ComponentStorage<T>> {
    storage
        .as_any_mut()
        .downcast_mut::<NamedStorage<T>>()
        .map(|named| &mut named.storage)
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("entities", &self.allocator.len())
            .field(
                "components",
                &self
                    .storages
                    .iter()
                    .map(|s| s.component_name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
