//! The authoritative server application.
//!
//! Each loop iteration feeds the elapsed wall-clock time into the
//! simulation's fixed-timestep clock and runs every whole tick it yields,
//! polling the network before each one. The loop then sleeps until the
//! clock holds the next tick.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use galunga_bus::{EventBus, Subscription};
use galunga_math::Transform;
use galunga_net::{Channel, FromPeer, NetworkServer, PeerConnected, PeerDisconnected};
use galunga_system::{Collider, Collision, Expired, Lifetime};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::protocol::{self, ServerCollision, ServerExpired, SpawnRequest, Welcome};
use crate::shutdown::ShutdownFlag;
use crate::simulation::Simulation;
use crate::tick::TickConfig;

/// Longest lifetime a client may request for a spawned entity, in seconds.
pub const MAX_SPAWN_TTL: f32 = 30.0;

/// Runs the simulation and serves it to connected peers.
pub struct ServerApplication {
    name: String,
    tick: TickConfig,
    sim: Simulation,
    network: NetworkServer,
    shutdown: ShutdownFlag,
    /// Tick id readable from bus handlers.
    current_tick: Rc<Cell<u64>>,
    _subscriptions: Vec<Subscription>,
}

impl ServerApplication {
    /// Build the server, register its messages and wire the bus handlers.
    #[must_use]
    pub fn new(name: impl Into<String>, bus: &EventBus, mut network: NetworkServer, config: &AppConfig) -> Self {
        protocol::register_server_messages(&mut network);
        let sim = Simulation::new(bus, &config.tick, config.collision.clone());
        let current_tick = Rc::new(Cell::new(0));
        let subscriptions = Self::wire(bus, &sim, &network, &current_tick);
        Self {
            name: name.into(),
            tick: config.tick.clone(),
            sim,
            network,
            shutdown: ShutdownFlag::new(),
            current_tick,
            _subscriptions: subscriptions,
        }
    }

    fn wire(
        bus: &EventBus,
        sim: &Simulation,
        network: &NetworkServer,
        current_tick: &Rc<Cell<u64>>,
    ) -> Vec<Subscription> {
        let mut subscriptions = Vec::new();

        let outbox = network.outbox();
        let tick = Rc::clone(current_tick);
        subscriptions.push(bus.try_subscribe(move |event: &PeerConnected| {
            info!(peer = %event.peer, addr = %event.addr, "peer joined");
            outbox.send_to(
                event.peer,
                Channel::Reliable,
                &Welcome {
                    peer: event.peer,
                    tick: tick.get(),
                },
            )?;
            Ok(())
        }));

        subscriptions.push(bus.subscribe(|event: &PeerDisconnected| {
            info!(peer = %event.peer, reason = %event.reason, "peer left");
        }));

        let commands = sim.commands().clone();
        subscriptions.push(bus.subscribe(move |event: &FromPeer<SpawnRequest>| {
            let request = event.message;
            if !request.translation.is_finite() || request.ttl.is_nan() || request.ttl <= 0.0 {
                warn!(peer = %event.peer, "ignoring malformed spawn request");
                return;
            }
            let ttl = request.ttl.min(MAX_SPAWN_TTL);
            debug!(peer = %event.peer, x = request.translation.x, y = request.translation.y, ttl, "spawning");
            commands.spawn(format!("spawned by {}", event.peer), move |scene, entity| {
                scene.add_component(entity, Transform::from_translation(request.translation))?;
                scene.add_component(entity, Collider::default())?;
                scene.add_component(entity, Lifetime::new(ttl))?;
                Ok(())
            });
        }));

        let outbox = network.outbox();
        let tick = Rc::clone(current_tick);
        subscriptions.push(bus.try_subscribe(move |event: &Collision| {
            outbox.broadcast(
                Channel::Reliable,
                &ServerCollision {
                    entity0: event.entity0,
                    entity1: event.entity1,
                    tick: tick.get(),
                },
            )?;
            Ok(())
        }));

        let outbox = network.outbox();
        let tick = Rc::clone(current_tick);
        subscriptions.push(bus.try_subscribe(move |event: &Expired| {
            outbox.broadcast(
                Channel::Reliable,
                &ServerExpired {
                    entity: event.entity,
                    tick: tick.get(),
                },
            )?;
            Ok(())
        }));

        subscriptions
    }

    /// Returns the server name.
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

    /// Returns a reference to the network server.
    #[must_use]
    pub fn network(&self) -> &NetworkServer {
        &self.network
    }

    /// Raising this flag ends [`run`](Self::run) at the next tick boundary.
    #[must_use]
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Feed `dt` of elapsed time into the clock and run every whole tick
    /// it yields, polling the network before each. Returns the number of
    /// ticks run.
    ///
    /// # Errors
    ///
    /// Fails if the transport is gone or a system fails.
    pub fn advance(&mut self, dt: Duration) -> Result<u32> {
        self.advance_at_most(dt, u32::MAX)
    }

    /// Run exactly one tick. Returns the new tick id.
    ///
    /// # Errors
    ///
    /// Fails if the transport is gone or a system fails.
    pub fn tick(&mut self) -> Result<u64> {
        let tick = self.sim.clock().tick();
        self.advance_at_most(tick, 1)?;
        Ok(self.sim.tick_id())
    }

    fn advance_at_most(&mut self, dt: Duration, limit: u32) -> Result<u32> {
        let tick = self.sim.clock().tick();
        let network = &mut self.network;
        let current_tick = &self.current_tick;
        self.sim.advance_at_most(dt, limit, |sim| {
            current_tick.set(sim.tick_id() + 1);
            network.poll(tick, sim.bus()).context("network poll failed")?;
            Ok(())
        })
    }

    /// Ticks `run` may still take before reaching `max_ticks`.
    fn ticks_left(&self, ran: u64) -> u32 {
        if self.tick.max_ticks == 0 {
            return u32::MAX;
        }
        u32::try_from(self.tick.max_ticks.saturating_sub(ran)).unwrap_or(u32::MAX)
    }

    /// Tick in step with the wall clock until `max_ticks` is reached or
    /// shutdown is requested, then disconnect every peer.
    ///
    /// # Errors
    ///
    /// Stops at the first failing tick; peers are still disconnected.
    pub fn run(&mut self) -> Result<()> {
        let tick_duration = self.sim.clock().tick();
        let first_tick = self.sim.tick_id();

        info!(
            name = %self.name,
            local_addr = %self.network.local_addr(),
            tick_rate = self.tick.tick_rate,
            max_ticks = self.tick.max_ticks,
            "server starting"
        );

        let mut last = Instant::now();
        let result = loop {
            let now = Instant::now();
            let dt = now - last;
            last = now;

            let limit = self.ticks_left(self.sim.tick_id() - first_tick);
            if let Err(e) = self.advance_at_most(dt, limit) {
                break Err(e);
            }

            let ran = self.sim.tick_id() - first_tick;
            if self.tick.is_finished(ran) {
                info!(ticks = ran, "tick limit reached");
                break Ok(());
            }
            if self.shutdown.is_requested() {
                break Ok(());
            }

            let work = now.elapsed();
            if work > tick_duration {
                warn!(
                    tick_id = self.sim.tick_id(),
                    elapsed_ms = work.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
            if let Some(rest) = remaining_budget(self.sim.clock().until_next_tick(), work) {
                std::thread::sleep(rest);
            }
        };

        self.network.shutdown().context("failed to disconnect peers")?;
        info!(name = %self.name, ticks = self.sim.tick_id() - first_tick, "server stopped");
        result
    }
}

impl std::fmt::Debug for ServerApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerApplication")
            .field("name", &self.name)
            .field("sim", &self.sim)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Time left of `budget` after work that took `elapsed`.
#[must_use]
pub fn remaining_budget(budget: Duration, elapsed: Duration) -> Option<Duration> {
    budget.checked_sub(elapsed).filter(|d| !d.is_zero())
}
