//! Deferred structural changes.
//!
//! Systems and event handlers cannot mutate the scene while it is borrowed
//! for a query or a dispatch. They record changes in [`Commands`] instead and
//! the tick driver applies them with [`Scene::apply`] once the systems have
//! run.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use galunga_component::{Component, Entity};

use crate::error::SceneError;
use crate::scene::Scene;

type Command = Box<dyn FnOnce(&mut Scene) -> Result<(), SceneError>>;

/// A shared FIFO queue of scene changes.
///
/// Clones share the same queue, so a handle can be moved into an event
/// handler while the tick driver keeps another.
#[derive(Clone, Default)]
pub struct Commands {
    queue: Rc<RefCell<VecDeque<Command>>>,
}

impl Commands {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary change.
    pub fn push(&self, command: impl FnOnce(&mut Scene) -> Result<(), SceneError> + 'static) {
        self.queue.borrow_mut().push_back(Box::new(command));
    }

    /// Queue creation of a named entity; `build` runs right after it exists.
    pub fn spawn(
        &self,
        name: impl Into<String>,
        build: impl FnOnce(&mut Scene, Entity) -> Result<(), SceneError> + 'static,
    ) {
        let name = name.into();
        self.push(move |scene| {
            let entity = scene.create_entity(name);
            build(scene, entity)
        });
    }

    /// Queue destruction of `entity`.
    ///
    /// Destroying an entity that is already gone when the queue runs is a
    /// no-op, so two systems may both retire the same entity in one tick.
    pub fn destroy(&self, entity: Entity) {
        self.push(move |scene| {
            if scene.contains(entity) {
                scene.destroy_entity(entity)
            } else {
                Ok(())
            }
        });
    }

    /// Queue attaching `value` to `entity`.
    pub fn insert<T: Component>(&self, entity: Entity, value: T) {
        self.push(move |scene| scene.add_component(entity, value).map(|_| ()));
    }

    /// Queue detaching the entity's `T`.
    pub fn remove<T: Component>(&self, entity: Entity) {
        self.push(move |scene| scene.remove_component::<T>(entity).map(|_| ()));
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Take the oldest command. The queue is not borrowed while it runs.
    pub(crate) fn pop(&self) -> Option<Command> {
        self.queue.borrow_mut().pop_front()
    }
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commands").field("pending", &self.len()).finish()
    }
}
