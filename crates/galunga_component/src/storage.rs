//! Sparse-set component storage.
//!
//! Each component type lives in its own [`ComponentStorage`]: a dense array of
//! values, a parallel dense array of owning entities, and a sparse index from
//! entity slot to dense position. Add, remove and lookup are O(1); removal
//! swaps the last element into the hole so the dense arrays stay contiguous.

use std::any::Any;

use crate::entity::Entity;

/// Dense storage for one component type.
#[derive(Debug)]
pub struct ComponentStorage<T> {
    /// `sparse[entity.index()]` is the dense position of that entity's value.
    sparse: Vec<Option<u32>>,
    /// Owning entity of `dense[i]`.
    entities: Vec<Entity>,
    dense: Vec<T>,
}

impl<T> ComponentStorage<T> {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            dense: Vec::new(),
        }
    }

    /// Returns the number of stored components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Returns `true` if the storage holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    fn position(&self, entity: Entity) -> Option<usize> {
        let pos = (*self.sparse.get(entity.index() as usize)?)? as usize;
        // The slot may have been recycled for a newer generation.
        (self.entities[pos] == entity).then_some(pos)
    }

    /// Returns `true` if `entity` has a value here.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.position(entity).is_some()
    }

    /// Insert or replace the value for `entity`. Returns the previous value.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        if let Some(pos) = self.position(entity) {
            return Some(std::mem::replace(&mut self.dense[pos], value));
        }
        let slot = entity.index() as usize;
        if self.sparse.len() <= slot {
            self.sparse.resize(slot + 1, None);
        }
        self.sparse[slot] = Some(self.dense.len() as u32);
        self.entities.push(entity);
        self.dense.push(value);
        None
    }

    /// Remove and return the value for `entity`.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let pos = self.position(entity)?;
        self.sparse[entity.index() as usize] = None;
        self.entities.swap_remove(pos);
        let value = self.dense.swap_remove(pos);
        if let Some(moved) = self.entities.get(pos) {
            self.sparse[moved.index() as usize] = Some(pos as u32);
        }
        Some(value)
    }

    /// Get a reference to the value for `entity`.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.position(entity).map(|pos| &self.dense[pos])
    }

    /// Get a mutable reference to the value for `entity`.
    #[must_use]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.position(entity).map(|pos| &mut self.dense[pos])
    }

    /// Owning entities in dense order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Iterate `(entity, value)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.dense.iter())
    }

    /// Iterate `(entity, value)` pairs mutably in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.dense.iter_mut())
    }
}

impl<T> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe view of a [`ComponentStorage`] used by the scene to hold
/// storages of unrelated types in one map.
pub trait ErasedStorage: Any {
    /// Drop the value owned by `entity`, if any.
    fn remove_entity(&mut self, entity: Entity) -> bool;
    /// Returns `true` if `entity` has a value here.
    fn contains_entity(&self, entity: Entity) -> bool;
    /// Name of the stored component type.
    fn component_name(&self) -> &'static str;
    /// Upcast for downcasting to the typed storage.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting to the typed storage.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// [`ComponentStorage`] tagged with the component's name.
#[derive(Debug)]
pub struct NamedStorage<T> {
    pub name: &'static str,
    pub storage: ComponentStorage<T>,
}

impl<T: 'static> ErasedStorage for NamedStorage<T> {
    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.storage.remove(entity).is_some()
    }

    fn contains_entity(&self, entity: Entity) -> bool {
        self.storage.contains(entity)
    }

    fn component_name(&self) -> &'static str {
        self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(index: u32) -> Entity {
        Entity::new(index, 0)
    }

    #[test]
    fn test_insert_and_get() {
        let mut storage = ComponentStorage::new();
        assert!(storage.insert(e(3), 1.5_f32).is_none());
        assert_eq!(storage.get(e(3)), Some(&1.5));
        assert_eq!(storage.len(), 1);
        assert!(storage.get(e(0)).is_none());
    }

    #[test]
    fn test_insert_replaces() {
        let mut storage = ComponentStorage::new();
        storage.insert(e(0), "a");
        assert_eq!(storage.insert(e(0), "b"), Some("a"));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(e(0)), Some(&"b"));
    }

    #[test]
    fn test_remove_keeps_dense_index_consistent() {
        let mut storage = ComponentStorage::new();
        storage.insert(e(0), 10);
        storage.insert(e(1), 11);
        storage.insert(e(2), 12);
        assert_eq!(storage.remove(e(0)), Some(10));
        // e(2) was swapped into position 0.
        assert_eq!(storage.get(e(2)), Some(&12));
        assert_eq!(storage.get(e(1)), Some(&11));
        assert_eq!(storage.entities(), &[e(2), e(1)]);
        assert_eq!(storage.remove(e(0)), None);
    }

    #[test]
    fn test_stale_generation_is_absent() {
        let mut storage = ComponentStorage::new();
        storage.insert(Entity::new(4, 1), 'x');
        assert!(storage.get(Entity::new(4, 0)).is_none());
        assert!(storage.remove(Entity::new(4, 2)).is_none());
        assert!(storage.contains(Entity::new(4, 1)));
    }

    #[test]
    fn test_erased_downcast() {
        let mut named: Box<dyn ErasedStorage> = Box::new(NamedStorage {
            name: "Score",
            storage: ComponentStorage::<u32>::new(),
        });
        named
            .as_any_mut()
            .downcast_mut::<NamedStorage<u32>>()
            .unwrap()
            .storage
            .insert(e(1), 5);
        assert!(named.contains_entity(e(1)));
        assert_eq!(named.component_name(), "Score");
        assert!(named.remove_entity(e(1)));
        assert!(!named.remove_entity(e(1)));
    }
}
