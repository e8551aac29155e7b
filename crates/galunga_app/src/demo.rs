//! The client's startup scene.

use std::f32::consts::FRAC_PI_4;

use galunga_bus::EventBus;
use galunga_component::Entity;
use galunga_math::Transform;
use galunga_scene::{Scene, SceneError};
use galunga_system::{AddSprite, Collider, Sprite, Velocity};
use glam::Vec2;

/// Texture the demo sprites are drawn with.
pub const DEMO_TEXTURE: &str = "assets/textures/test2.png";

/// Speed of the player entity along +x, in units per second.
pub const PLAYER_SPEED: f32 = 1.0;

/// Entities created by [`populate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoScene {
    /// Large rotated sprite drifting towards `target`.
    pub player: Entity,
    /// Small stationary sprite.
    pub target: Entity,
}

/// Build the demo scene and announce its texture to the frontend.
///
/// The player's world bounds reach the target after 2.5 seconds of motion
/// and keep overlapping it for the rest of a short session.
///
/// # Errors
///
/// Only fails if the scene rejects a freshly created entity.
pub fn populate(scene: &mut Scene, bus: &EventBus) -> Result<DemoScene, SceneError> {
    bus.publish(AddSprite {
        path: DEMO_TEXTURE.to_string(),
    });

    let player = scene.create_entity("hello");
    scene.add_component(
        player,
        Transform::from_translation(Vec2::new(0.0, -3.0))
            .with_scale(Vec2::splat(10.0))
            .with_rotation(FRAC_PI_4),
    )?;
    scene.add_component(player, Sprite { index: 0 })?;
    scene.add_component(player, Collider::default())?;
    scene.add_component(player, Velocity::new(Vec2::new(PLAYER_SPEED, 0.0)))?;

    let target = scene.create_entity("other");
    scene.add_component(target, Transform::from_translation(Vec2::new(8.0, 0.0)))?;
    scene.add_component(target, Sprite { index: 0 })?;
    scene.add_component(target, Collider::default())?;

    Ok(DemoScene { player, target })
}

#[cfg(test)]
mod tests {
    use galunga_math::Aabb;

    use super::*;

    #[test]
    fn test_demo_starts_apart() {
        let bus = EventBus::new();
        let mut scene = Scene::new(&bus);
        let demo = populate(&mut scene, &bus).unwrap();
        assert_eq!(scene.name(demo.player), Some("hello"));
        assert_eq!(scene.name(demo.target), Some("other"));

        let bounds = |e| Aabb::UNIT.transformed(scene.get_component::<Transform>(e).unwrap());
        assert!(!bounds(demo.player).overlaps(&bounds(demo.target)));
    }
}
