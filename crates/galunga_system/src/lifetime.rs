//! Timed entity expiry.

use anyhow::Result;
use tracing::debug;

use crate::components::Lifetime;
use crate::context::TickContext;
use crate::events::Expired;
use crate::schedule::System;

/// Counts every [`Lifetime`] down by the tick duration and destroys the
/// entities that reach zero, publishing [`Expired`] for each in ascending
/// entity order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifetimeSystem;

impl System for LifetimeSystem {
    fn name(&self) -> &'static str {
        "lifetime"
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Result<()> {
        let dt = ctx.dt;
        let mut expired = Vec::new();
        ctx.scene.each_mut::<Lifetime>(|entity, lifetime| {
            lifetime.remaining -= dt;
            if lifetime.is_expired() {
                expired.push(entity);
            }
        });
        expired.sort_unstable();

        for entity in expired {
            ctx.scene.destroy_entity(entity)?;
            debug!(tick_id = ctx.tick_id, %entity, "entity expired");
            ctx.bus.publish(Expired { entity });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use galunga_bus::EventBus;
    use galunga_scene::{Commands, EntityDestroyed, Scene};

    use super::*;

    #[test]
    fn test_entities_expire_after_their_lifetime() {
        let bus = EventBus::new();
        let expired = Rc::new(RefCell::new(Vec::new()));
        let sink = expired.clone();
        let _sub = bus.subscribe(move |e: &Expired| sink.borrow_mut().push(e.entity));
        let mut scene = Scene::new(&bus);
        let commands = Commands::new();

        let short = scene.create_entity("short");
        scene.add_component(short, Lifetime::new(0.25)).unwrap();
        let long = scene.create_entity("long");
        scene.add_component(long, Lifetime::new(1.0)).unwrap();

        let mut ctx = TickContext::new(1, 0.125, &mut scene, &bus, &commands);
        LifetimeSystem.update(&mut ctx).unwrap();
        assert!(expired.borrow().is_empty());
        LifetimeSystem.update(&mut ctx).unwrap();
        assert_eq!(*expired.borrow(), vec![short]);

        assert!(!scene.contains(short));
        assert!(scene.contains(long));
    }

    #[test]
    fn test_expiry_order_is_ascending() {
        let bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let sink = order.clone();
        let _sub = bus.subscribe(move |e: &Expired| sink.borrow_mut().push(e.entity));
        let mut scene = Scene::new(&bus);
        let commands = Commands::new();

        let a = scene.create_entity("a");
        let b = scene.create_entity("b");
        let c = scene.create_entity("c");
        // Insert out of entity order so storage order differs.
        scene.add_component(c, Lifetime::new(0.0)).unwrap();
        scene.add_component(a, Lifetime::new(0.0)).unwrap();
        scene.add_component(b, Lifetime::new(0.0)).unwrap();

        let mut ctx = TickContext::new(1, 0.1, &mut scene, &bus, &commands);
        LifetimeSystem.update(&mut ctx).unwrap();
        assert_eq!(*order.borrow(), vec![a, b, c]);
        assert_eq!(scene.entity_count(), 0);
    }

    #[test]
    fn test_destroy_is_announced_before_expired() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let _destroyed = bus.subscribe(move |_: &EntityDestroyed| sink.borrow_mut().push("destroyed"));
        let sink = log.clone();
        let _expired = bus.subscribe(move |_: &Expired| sink.borrow_mut().push("expired"));
        let mut scene = Scene::new(&bus);
        let commands = Commands::new();
        let e = scene.create_entity("e");
        scene.add_component(e, Lifetime::new(0.05)).unwrap();

        let mut ctx = TickContext::new(1, 0.1, &mut scene, &bus, &commands);
        LifetimeSystem.update(&mut ctx).unwrap();
        assert_eq!(*log.borrow(), vec!["destroyed", "expired"]);
    }
}
