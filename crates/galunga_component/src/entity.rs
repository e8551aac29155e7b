//! Entity type and allocation utilities.
//!
//! An [`Entity`] is a lightweight identifier with no inherent data. It is a
//! slot index paired with a generation counter: when a slot is recycled its
//! generation is bumped, so a full identifier is never handed out twice.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique entity identifier.
///
/// Entities are pure identifiers: they carry no data of their own. Components
/// are attached to entities to give them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Create an entity from its slot index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the storage slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation of the slot at the time this id was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack the identifier into a `u64` (generation in the high half).
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Rebuild an identifier packed with [`Entity::to_bits`].
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Allocates entity ids, recycling freed slots with a bumped generation.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    /// Current generation of every slot ever allocated.
    generations: Vec<u32>,
    /// Whether the slot currently holds a live entity.
    alive: Vec<bool>,
    /// Freed slots available for reuse.
    free: Vec<u32>,
    live: usize,
}

impl EntityAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh entity id.
    pub fn allocate(&mut self) -> Entity {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return Entity::new(index, self.generations[slot]);
        }
        let index = u32::try_from(self.generations.len()).unwrap_or_else(|_| {
            panic!("entity index space exhausted ({} slots)", u32::MAX);
        });
        self.generations.push(0);
        self.alive.push(true);
        Entity::new(index, 0)
    }

    /// Releases an entity id. Returns `false` if it was not alive.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index() as usize;
        self.alive[slot] = false;
        // A slot whose generation would wrap is retired instead of recycled.
        if let Some(next) = self.generations[slot].checked_add(1) {
            self.generations[slot] = next;
            self.free.push(entity.index());
        }
        self.live -= 1;
        true
    }

    /// Returns `true` if `entity` is the current occupant of its slot.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;
        self.alive.get(slot).copied().unwrap_or(false)
            && self.generations[slot] == entity.generation()
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entity is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over all live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(slot, _)| Entity::new(slot as u32, self.generations[slot]))
    }
}
