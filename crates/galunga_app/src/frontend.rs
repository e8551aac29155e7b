//! Window and input collaborators.
//!
//! The simulation never talks to a window directly. A [`Frontend`] is
//! handed the scene once per outer loop iteration to present it, and an
//! [`InputSource`] is polled once per fixed tick to turn device input into
//! bus events.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use galunga_bus::{EventBus, Subscription};
use galunga_scene::Scene;
use galunga_system::AddSprite;
use glam::Vec2;
use tracing::{debug, info};

use crate::protocol::SpawnRequest;

/// Keys the application reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Escape,
    Space,
    Left,
    Right,
    Up,
    Down,
}

/// Presents the scene and owns the window lifecycle.
pub trait Frontend {
    /// Present one frame. Called once per outer loop iteration.
    ///
    /// # Errors
    ///
    /// A presentation failure stops the client.
    fn frame(&mut self, dt: Duration, scene: &Scene) -> Result<()>;

    /// Returns `true` once the window should close.
    fn should_close(&self) -> bool;

    /// Ask the window to close.
    fn request_close(&mut self);

    /// Returns `true` while `key` is held.
    fn is_key_down(&self, key: Key) -> bool;
}

/// Turns device input into bus events, once per fixed tick.
pub trait InputSource {
    /// # Errors
    ///
    /// A failing input device stops the client.
    fn poll_events(&mut self, dt: Duration, bus: &EventBus) -> Result<()>;
}

/// Publishes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInput;

impl InputSource for NullInput {
    fn poll_events(&mut self, _dt: Duration, _bus: &EventBus) -> Result<()> {
        Ok(())
    }
}

/// Publishes a [`SpawnRequest`] every `interval` of simulated time,
/// stepping the spawn point along the x axis.
#[derive(Debug, Clone)]
pub struct SpawnInput {
    interval: Duration,
    elapsed: Duration,
    ttl: f32,
    next_x: f32,
    sent: u64,
}

impl SpawnInput {
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn new(interval: Duration, ttl: f32) -> Self {
        assert!(!interval.is_zero(), "spawn interval must be nonzero");
        Self {
            interval,
            elapsed: Duration::ZERO,
            ttl,
            next_x: 0.0,
            sent: 0,
        }
    }

    /// Requests published so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl InputSource for SpawnInput {
    fn poll_events(&mut self, dt: Duration, bus: &EventBus) -> Result<()> {
        self.elapsed += dt;
        while self.elapsed >= self.interval {
            self.elapsed -= self.interval;
            let request = SpawnRequest {
                translation: Vec2::new(self.next_x, 0.0),
                ttl: self.ttl,
            };
            self.next_x += 1.0;
            self.sent += 1;
            debug!(x = request.translation.x, ttl = request.ttl, "requesting spawn");
            bus.publish(request);
        }
        Ok(())
    }
}

/// A frontend without a window, for tests and the
/// headless client binary.
///
/// It closes after an optional frame budget and records the sprite
/// textures announced through [`AddSprite`].
pub struct HeadlessFrontend {
    frames: u64,
    max_frames: Option<u64>,
    frame_interval: Duration,
    closed: bool,
    keys_down: HashSet<Key>,
    sprites: Rc<RefCell<Vec<String>>>,
    _sprite_subscription: Subscription,
}

impl HeadlessFrontend {
    /// A frontend that records sprites announced on `bus`.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        let sprites = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&sprites);
        let subscription = bus.subscribe(move |event: &AddSprite| {
            info!(path = %event.path, "sprite registered");
            sink.borrow_mut().push(event.path.clone());
        });
        Self {
            frames: 0,
            max_frames: None,
            frame_interval: Duration::ZERO,
            closed: false,
            keys_down: HashSet::new(),
            sprites,
            _sprite_subscription: subscription,
        }
    }

    /// Close after presenting `max_frames` frames.
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Sleep this long per frame, standing in for vsync.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Hold `key` down.
    pub fn press(&mut self, key: Key) {
        self.keys_down.insert(key);
    }

    /// Let go of `key`.
    pub fn release(&mut self, key: Key) {
        self.keys_down.remove(&key);
    }

    /// Frames presented so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Sprite paths announced so far, in order.
    #[must_use]
    pub fn sprites(&self) -> Vec<String> {
        self.sprites.borrow().clone()
    }
}

impl Frontend for HeadlessFrontend {
    fn frame(&mut self, _dt: Duration, _scene: &Scene) -> Result<()> {
        self.frames += 1;
        if self.max_frames.is_some_and(|max| self.frames >= max) {
            self.closed = true;
        }
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        Ok(())
    }

    fn should_close(&self) -> bool {
        self.closed
    }

    fn request_close(&mut self) {
        self.closed = true;
    }

    fn is_key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }
}

impl std::fmt::Debug for HeadlessFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessFrontend")
            .field("frames", &self.frames)
            .field("max_frames", &self.max_frames)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_counts_sprites() {
        let bus = EventBus::new();
        let frontend = HeadlessFrontend::new(&bus);
        bus.publish(AddSprite {
            path: "assets/textures/test2.png".into(),
        });
        assert_eq!(frontend.sprites(), vec!["assets/textures/test2.png".to_string()]);
    }

    #[test]
    fn test_headless_closes_after_frame_budget() {
        let bus = EventBus::new();
        let scene = Scene::new(&bus);
        let mut frontend = HeadlessFrontend::new(&bus).with_max_frames(2);
        frontend.frame(Duration::ZERO, &scene).unwrap();
        assert!(!frontend.should_close());
        frontend.frame(Duration::ZERO, &scene).unwrap();
        assert!(frontend.should_close());
        assert_eq!(frontend.frames(), 2);
    }

    #[test]
    fn test_keys() {
        let bus = EventBus::new();
        let mut frontend = HeadlessFrontend::new(&bus);
        frontend.press(Key::Escape);
        assert!(frontend.is_key_down(Key::Escape));
        frontend.release(Key::Escape);
        assert!(!frontend.is_key_down(Key::Escape));
    }

    #[test]
    fn test_spawn_input_publishes_on_interval() {
        let bus = EventBus::new();
        let requests = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&requests);
        let _sub = bus.subscribe(move |r: &SpawnRequest| sink.borrow_mut().push(*r));

        let mut input = SpawnInput::new(Duration::from_millis(100), 0.5);
        for _ in 0..25 {
            input.poll_events(Duration::from_millis(10), &bus).unwrap();
        }
        assert_eq!(input.sent(), 2);
        let requests = requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].translation, Vec2::new(1.0, 0.0));
        assert_eq!(requests[0].ttl, 0.5);
    }

    #[test]
    fn test_null_input_is_silent() {
        let bus = EventBus::new();
        NullInput.poll_events(Duration::from_millis(16), &bus).unwrap();
    }
}
