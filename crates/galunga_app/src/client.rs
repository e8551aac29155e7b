//! The interactive client application.
//!
//! Each outer iteration measures elapsed time, advances the simulation by
//! whole ticks (polling input and the network before every tick) and then
//! presents one frame.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use galunga_bus::{EventBus, Subscription};
use galunga_net::{Channel, NetworkHost, ServerConnected, ServerDisconnected};
use galunga_system::Collision;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::demo::{self, DemoScene};
use crate::frontend::{Frontend, InputSource, Key};
use crate::protocol::{self, ServerCollision, ServerExpired, SpawnRequest, Welcome};
use crate::shutdown::ShutdownFlag;
use crate::simulation::Simulation;
use crate::tick::TickConfig;

/// What the client has heard from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerLog {
    pub welcome: Option<Welcome>,
    pub collisions: Vec<ServerCollision>,
    pub expired: Vec<ServerExpired>,
}

/// Runs the local simulation, presents it and talks to an optional server.
pub struct ClientApplication<F, I> {
    name: String,
    tick: TickConfig,
    sim: Simulation,
    frontend: F,
    input: I,
    network: Option<NetworkHost>,
    demo: DemoScene,
    shutdown: ShutdownFlag,
    server_log: Rc<RefCell<ServerLog>>,
    collisions: Rc<RefCell<Vec<Collision>>>,
    _subscriptions: Vec<Subscription>,
}

impl<F: Frontend, I: InputSource> ClientApplication<F, I> {
    /// Build the client and its demo scene. With `network` set, server
    /// messages are registered and local [`SpawnRequest`]s are sent to it.
    ///
    /// # Errors
    ///
    /// Fails if the demo scene cannot be built.
    pub fn new(
        name: impl Into<String>,
        bus: &EventBus,
        frontend: F,
        input: I,
        mut network: Option<NetworkHost>,
        config: &AppConfig,
    ) -> Result<Self> {
        let mut sim = Simulation::new(bus, &config.tick, config.collision.clone());
        let demo = demo::populate(sim.scene_mut(), bus).context("failed to build the demo scene")?;

        let server_log = Rc::new(RefCell::new(ServerLog::default()));
        let collisions = Rc::new(RefCell::new(Vec::new()));
        let mut subscriptions = Vec::new();

        let log = Rc::clone(&collisions);
        subscriptions.push(bus.subscribe(move |event: &Collision| {
            info!(entity0 = %event.entity0, entity1 = %event.entity1, "collision");
            log.borrow_mut().push(*event);
        }));

        if let Some(host) = network.as_mut() {
            protocol::register_client_messages(host);
            subscriptions.push(host.replicate::<SpawnRequest>(bus, Channel::Reliable));
            subscriptions.extend(Self::wire_server_log(bus, &server_log));
        }

        Ok(Self {
            name: name.into(),
            tick: config.tick.clone(),
            sim,
            frontend,
            input,
            network,
            demo,
            shutdown: ShutdownFlag::new(),
            server_log,
            collisions,
            _subscriptions: subscriptions,
        })
    }

    fn wire_server_log(bus: &EventBus, server_log: &Rc<RefCell<ServerLog>>) -> Vec<Subscription> {
        let log = Rc::clone(server_log);
        let welcome = bus.subscribe(move |event: &Welcome| {
            info!(peer = %event.peer, server_tick = event.tick, "welcomed by server");
            log.borrow_mut().welcome = Some(*event);
        });
        let log = Rc::clone(server_log);
        let collision = bus.subscribe(move |event: &ServerCollision| {
            debug!(server_tick = event.tick, "server reported collision");
            log.borrow_mut().collisions.push(*event);
        });
        let log = Rc::clone(server_log);
        let expired = bus.subscribe(move |event: &ServerExpired| {
            debug!(server_tick = event.tick, entity = %event.entity, "server entity expired");
            log.borrow_mut().expired.push(*event);
        });
        let connected = bus.subscribe(|event: &ServerConnected| {
            info!(peer = %event.peer, "connected to server");
        });
        let disconnected = bus.subscribe(|event: &ServerDisconnected| {
            info!(reason = %event.reason, "disconnected from server");
        });
        vec![welcome, collision, expired, connected, disconnected]
    }

    /// Returns the client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a reference to the simulation.
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Returns a mutable reference to the simulation.
    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    /// Returns a reference to the frontend.
    #[must_use]
    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    /// Returns a mutable reference to the frontend.
    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    /// Returns a reference to the input source.
    #[must_use]
    pub fn input(&self) -> &I {
        &self.input
    }

    /// The link to the server, if the client is online.
    #[must_use]
    pub fn network(&self) -> Option<&NetworkHost> {
        self.network.as_ref()
    }

    /// Entities of the demo scene.
    #[must_use]
    pub fn demo(&self) -> DemoScene {
        self.demo
    }

    /// Local collisions reported so far.
    #[must_use]
    pub fn collisions(&self) -> Vec<Collision> {
        self.collisions.borrow().clone()
    }

    /// Snapshot of what the server has sent so far.
    #[must_use]
    pub fn server_log(&self) -> ServerLog {
        self.server_log.borrow().clone()
    }

    /// Raising this flag ends [`run`](Self::run) at the next frame.
    #[must_use]
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Start the handshake, if there is a server.
    ///
    /// # Errors
    ///
    /// Fails if the transport is gone.
    pub fn connect(&mut self) -> Result<()> {
        if let Some(host) = self.network.as_mut() {
            host.connect().context("failed to start connecting")?;
        }
        Ok(())
    }

    /// Process one outer iteration with `dt` of elapsed time. Returns the
    /// number of ticks run.
    ///
    /// # Errors
    ///
    /// Fails if input, the network, a system or the frontend fails.
    pub fn frame(&mut self, dt: Duration) -> Result<u32> {
        let tick = self.sim.clock().tick();
        let input = &mut self.input;
        let network = &mut self.network;
        let steps = self.sim.advance(dt, |sim| {
            input.poll_events(tick, sim.bus())?;
            if let Some(host) = network.as_mut() {
                host.poll(tick, sim.bus()).context("network poll failed")?;
            }
            Ok(())
        })?;

        if self.frontend.is_key_down(Key::Escape) {
            self.frontend.request_close();
        }
        self.frontend.frame(dt, self.sim.scene())?;
        Ok(steps)
    }

    /// Loop until the frontend closes, shutdown is requested or `max_ticks`
    /// is reached, then disconnect from the server.
    ///
    /// # Errors
    ///
    /// Stops at the first failing frame.
    pub fn run(&mut self) -> Result<()> {
        info!(name = %self.name, tick_rate = self.tick.tick_rate, online = self.network.is_some(), "client starting");
        self.connect()?;

        let mut last = Instant::now();
        let result = loop {
            if self.shutdown.is_requested() || self.frontend.should_close() {
                break Ok(());
            }
            let now = Instant::now();
            let dt = now - last;
            last = now;

            if let Err(e) = self.frame(dt) {
                break Err(e);
            }
            if self.tick.is_finished(self.sim.tick_id()) {
                info!(ticks = self.sim.tick_id(), "tick limit reached");
                break Ok(());
            }
        };

        if let Some(host) = self.network.as_mut() {
            host.disconnect().context("failed to disconnect")?;
        }
        info!(name = %self.name, ticks = self.sim.tick_id(), "client stopped");
        result
    }
}

impl<F, I> std::fmt::Debug for ClientApplication<F, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientApplication")
            .field("name", &self.name)
            .field("sim", &self.sim)
            .field("online", &self.network.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use galunga_math::Transform;

    use super::*;
    use crate::frontend::{HeadlessFrontend, NullInput};

    const FRAME: Duration = Duration::from_millis(16);

    fn offline(bus: &EventBus) -> ClientApplication<HeadlessFrontend, NullInput> {
        ClientApplication::new(
            "test",
            bus,
            HeadlessFrontend::new(bus),
            NullInput,
            None,
            &AppConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_demo_sprite_reaches_frontend() {
        let bus = EventBus::new();
        let app = offline(&bus);
        assert_eq!(app.frontend().sprites(), vec![demo::DEMO_TEXTURE.to_string()]);
        assert_eq!(app.simulation().scene().entity_count(), 2);
    }

    #[test]
    fn test_frame_moves_player() {
        let bus = EventBus::new();
        let mut app = offline(&bus);
        let player = app.demo().player;
        let steps = app.frame(Duration::from_millis(90)).unwrap();
        assert_eq!(steps, 5);
        let x = app
            .simulation()
            .scene()
            .get_component::<Transform>(player)
            .unwrap()
            .translation
            .x;
        assert!((x - 5.0 / 60.0).abs() < 1e-4);
        assert_eq!(app.frontend().frames(), 1);
    }

    #[test]
    fn test_escape_closes() {
        let bus = EventBus::new();
        let mut app = offline(&bus);
        app.frontend_mut().press(Key::Escape);
        app.frame(FRAME).unwrap();
        assert!(app.frontend().should_close());
        app.run().unwrap();
        assert_eq!(app.frontend().frames(), 1);
    }

    #[test]
    fn test_run_stops_when_frontend_closes() {
        let bus = EventBus::new();
        let mut app = ClientApplication::new(
            "test",
            &bus,
            HeadlessFrontend::new(&bus).with_max_frames(3),
            NullInput,
            None,
            &AppConfig::default(),
        )
        .unwrap();
        app.run().unwrap();
        assert_eq!(app.frontend().frames(), 3);
        assert!(app.network().is_none());
    }
}
