//! Whole-application scenarios: the demo collision, an idle server, and a
//! client talking to a server over the in-memory network and over UDP.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use galunga_app::demo;
use galunga_app::{
    AppConfig, ClientApplication, HeadlessFrontend, NullInput, ServerApplication, Simulation,
    SpawnInput, SpawnRequest, TickConfig,
};
use galunga_bus::{EventBus, Subscription};
use galunga_net::{
    FromPeer, MemoryNetwork, NetConfig, NetworkHost, NetworkServer, PeerConnected, PeerDisconnected,
    UdpTransport,
};
use galunga_system::{Collision, CollisionConfig, ContactPolicy, Expired};

fn record<E: Clone + 'static>(bus: &EventBus) -> (Rc<RefCell<Vec<E>>>, Subscription) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let sub = bus.subscribe(move |event: &E| sink.borrow_mut().push(event.clone()));
    (log, sub)
}

#[test]
fn test_player_hits_target_exactly_once() {
    let bus = EventBus::new();
    let mut sim = Simulation::new(&bus, &TickConfig::default(), CollisionConfig::default());
    let scene = demo::populate(sim.scene_mut(), &bus).unwrap();
    let (hits, _sub) = record::<Collision>(&bus);

    let mut first_hit = None;
    for _ in 0..600 {
        let tick = sim.step().unwrap();
        if first_hit.is_none() && !hits.borrow().is_empty() {
            first_hit = Some(tick);
        }
    }

    assert_eq!(*hits.borrow(), vec![Collision::new(scene.player, scene.target)]);
    // Bounds touch after 2.5 s of motion at 60 Hz.
    let first_hit = first_hit.unwrap();
    assert!((150..=152).contains(&first_hit), "first hit on tick {first_hit}");
}

#[test]
fn test_continuous_policy_reports_every_overlapping_tick() {
    let bus = EventBus::new();
    let collision = CollisionConfig::default().with_policy(ContactPolicy::Continuous);
    let mut sim = Simulation::new(&bus, &TickConfig::default(), collision);
    demo::populate(sim.scene_mut(), &bus).unwrap();
    let (hits, _sub) = record::<Collision>(&bus);

    for _ in 0..200 {
        sim.step().unwrap();
    }
    let count = hits.borrow().len();
    assert!((48..=51).contains(&count), "{count} reports");
}

#[test]
fn test_idle_server_publishes_nothing() {
    let network = MemoryNetwork::new();
    let bus = EventBus::new();
    let mut server = NetworkServer::new(network.bind_any().unwrap(), NetConfig::default());
    let (connected, _a) = record::<PeerConnected>(&bus);
    let (disconnected, _b) = record::<PeerDisconnected>(&bus);

    for _ in 0..1000 {
        let stats = server.poll(Duration::from_millis(16), &bus).unwrap();
        assert_eq!(stats.datagrams, 0);
        assert_eq!(stats.delivered, 0);
    }
    assert!(connected.borrow().is_empty());
    assert!(disconnected.borrow().is_empty());
    assert_eq!(server.peer_count(), 0);
}

#[test]
fn test_idle_server_application_ticks() {
    let network = MemoryNetwork::new();
    let bus = EventBus::new();
    let config = AppConfig::default();
    let transport = network.bind_any().unwrap();
    let mut server = ServerApplication::new(
        "idle",
        &bus,
        NetworkServer::new(transport, config.net.clone()),
        &config,
    );
    for _ in 0..1000 {
        server.tick().unwrap();
    }
    assert_eq!(server.simulation().tick_id(), 1000);
    assert_eq!(server.simulation().scene().entity_count(), 0);
}

struct Session {
    server: ServerApplication,
    client: ClientApplication<HeadlessFrontend, SpawnInput>,
    spawns: Rc<RefCell<Vec<FromPeer<SpawnRequest>>>>,
    expired: Rc<RefCell<Vec<Expired>>>,
    _subs: Vec<Subscription>,
}

impl Session {
    fn over_memory(network: &MemoryNetwork) -> Self {
        let server_addr: SocketAddr = "10.0.0.1:7777".parse().unwrap();
        let config = AppConfig::default();
        let server_transport = network.bind(server_addr).unwrap();
        let client_transport = network.bind_any().unwrap();
        Self::new(
            &config,
            NetworkServer::new(server_transport, config.net.clone()),
            NetworkHost::new(client_transport, server_addr, config.net.clone()),
        )
    }

    fn new(config: &AppConfig, server: NetworkServer, host: NetworkHost) -> Self {
        let server_bus = EventBus::new();
        let server = ServerApplication::new("server", &server_bus, server, config);
        let (spawns, a) = record::<FromPeer<SpawnRequest>>(&server_bus);
        let (expired, b) = record::<Expired>(&server_bus);

        let client_bus = EventBus::new();
        let mut client = ClientApplication::new(
            "client",
            &client_bus,
            HeadlessFrontend::new(&client_bus),
            SpawnInput::new(Duration::from_millis(250), 0.5),
            Some(host),
            config,
        )
        .unwrap();
        client.connect().unwrap();

        Self {
            server,
            client,
            spawns,
            expired,
            _subs: vec![a, b],
        }
    }

    /// One tick on each side, client first.
    fn tick(&mut self) {
        let tick = self.client.simulation().clock().tick();
        assert_eq!(self.client.frame(tick).unwrap(), 1);
        self.server.tick().unwrap();
    }
}

#[test]
fn test_client_and_server_over_memory() {
    let network = MemoryNetwork::new();
    let mut session = Session::over_memory(&network);

    for _ in 0..125 {
        session.tick();
    }

    let host = session.client.network().unwrap();
    assert!(host.is_connected());
    assert_eq!(session.server.network().peer_count(), 1);

    let log = session.client.server_log();
    let welcome = log.welcome.unwrap();
    assert_eq!(Some(welcome.peer), host.peer_id());

    // Just over two seconds of input at four requests per second.
    assert_eq!(session.client.input().sent(), 8);
    assert_eq!(session.spawns.borrow().len(), 8);
    assert!(session.spawns.borrow().iter().all(|s| s.peer == welcome.peer));

    // Server expiries reach the client in order; the newest may still be
    // in flight.
    let expired: Vec<_> = session.expired.borrow().iter().map(|e| e.entity).collect();
    assert!(expired.len() >= 5, "{} expiries", expired.len());
    let reported: Vec<_> = log.expired.iter().map(|e| e.entity).collect();
    assert!(reported.len() + 1 >= expired.len());
    assert_eq!(reported[..], expired[..reported.len()]);
}

#[test]
fn test_spawns_survive_packet_loss() {
    let network = MemoryNetwork::new();
    let mut session = Session::over_memory(&network);
    for _ in 0..10 {
        session.tick();
    }
    assert!(session.client.network().unwrap().is_connected());

    for i in 0..110 {
        if i % 7 == 0 {
            network.drop_next(1);
        }
        session.tick();
    }
    // Allow retransmits of the last requests to land.
    for _ in 0..60 {
        session.tick();
    }
    assert_eq!(session.spawns.borrow().len() as u64, session.client.input().sent());
}

#[test]
fn test_server_shutdown_reaches_client() {
    let network = MemoryNetwork::new();
    let mut session = Session::over_memory(&network);
    for _ in 0..10 {
        session.tick();
    }
    session.server.shutdown_flag().request();
    session.server.run().unwrap();
    assert_eq!(session.server.network().peer_count(), 0);

    let tick = session.client.simulation().clock().tick();
    session.client.frame(tick).unwrap();
    assert!(!session.client.network().unwrap().is_connected());
}

#[test]
fn test_offline_client_runs_demo() {
    let bus = EventBus::new();
    let config = AppConfig {
        tick: TickConfig::default().with_max_ticks(30),
        ..AppConfig::default()
    };
    let mut client =
        ClientApplication::new("offline", &bus, HeadlessFrontend::new(&bus), NullInput, None, &config)
            .unwrap();
    client.run().unwrap();
    assert!(client.simulation().tick_id() >= 30);
    assert!(client.collisions().is_empty());
}

#[test]
fn test_client_and_server_over_udp() {
    let config = AppConfig::default();
    let server_transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server = NetworkServer::new(server_transport, config.net.clone());
    let server_addr = server.local_addr();
    let client_transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let host = NetworkHost::new(client_transport, server_addr, config.net.clone());
    let mut session = Session::new(&config, server, host);

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.client.server_log().welcome.is_none() && Instant::now() < deadline {
        session.tick();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(session.client.server_log().welcome.is_some());
    assert_eq!(session.server.network().peer_count(), 1);
}
