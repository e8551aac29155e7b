//! Client side of a connection to one server.

use std::net::SocketAddr;
use std::time::Duration;

use galunga_bus::{EventBus, Subscription};
use tracing::{debug, info, trace, warn};

use crate::config::NetConfig;
use crate::connection::{Connection, DisconnectReason, LinkState};
use crate::error::NetError;
use crate::events::{ServerConnected, ServerDisconnected};
use crate::message::{Message, MessageRegistry};
use crate::outbox::{Outbox, Target};
use crate::packet::{Channel, Packet, SessionId};
use crate::peer::PeerId;
use crate::transport::Transport;

/// A client's link to a server.
///
/// Messages of registered types arrive on the bus as plain values.
pub struct NetworkHost {
    transport: Box<dyn Transport>,
    server: SocketAddr,
    config: NetConfig,
    session: SessionId,
    connection: Option<Connection>,
    peer: Option<PeerId>,
    /// Time spent handshaking, and since the last `Connect` was sent.
    connecting_for: Duration,
    since_connect_sent: Duration,
    registry: MessageRegistry<()>,
    outbox: Outbox,
}

impl NetworkHost {
    /// A host that will connect to `server` over `transport`.
    #[must_use]
    pub fn new(transport: impl Transport + 'static, server: SocketAddr, config: NetConfig) -> Self {
        Self {
            transport: Box::new(transport),
            server,
            config,
            session: SessionId::random(),
            connection: None,
            peer: None,
            connecting_for: Duration::ZERO,
            since_connect_sent: Duration::ZERO,
            registry: MessageRegistry::new(),
            outbox: Outbox::new(),
        }
    }

    /// Accept messages of type `M` from the server; each is published as-is.
    pub fn register<M: Message>(&mut self) {
        self.registry.insert(|_: &(), message: M, bus: &EventBus| {
            bus.publish(message);
        });
    }

    /// Handle for queueing messages to the server.
    #[must_use]
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Send every `M` published on `bus` to the server.
    pub fn replicate<M: Message>(&self, bus: &EventBus, channel: Channel) -> Subscription {
        self.outbox.replicate::<M>(bus, channel)
    }

    /// Current link state, `Disconnected` before `connect`.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.connection
            .as_ref()
            .map_or(LinkState::Disconnected, Connection::state)
    }

    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// The id the server assigned us, once connected.
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer
    }

    /// Address of the server.
    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Address the transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Session id sent with every connect attempt.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Start (or restart) the handshake with a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] if the transport has failed.
    pub fn connect(&mut self) -> Result<(), NetError> {
        self.session = SessionId::random();
        self.connection = Some(Connection::new(self.server, &self.config));
        self.peer = None;
        self.connecting_for = Duration::ZERO;
        info!(server = %self.server, "connecting");
        self.send_connect()
    }

    /// Tell the server we are leaving. No event is published.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] if the transport has failed.
    pub fn disconnect(&mut self) -> Result<(), NetError> {
        if self.connection.take().is_some() {
            self.peer = None;
            self.outbox.drain();
            info!(server = %self.server, "disconnecting");
            self.transport.send(self.server, Packet::Disconnect.to_bytes()?)?;
        }
        Ok(())
    }

    /// Drain the transport, advance timers by `dt` and flush outgoing
    /// traffic. Never blocks. Returns the number of messages published.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] if the transport has failed.
    /// Losing the server is reported as [`ServerDisconnected`] instead.
    pub fn poll(&mut self, dt: Duration, bus: &EventBus) -> Result<usize, NetError> {
        let mut delivered = 0;
        let mut datagrams = 0;
        while datagrams < self.config.max_datagrams_per_poll {
            let Some((addr, datagram)) = self.transport.try_recv()? else {
                break;
            };
            datagrams += 1;
            if addr != self.server {
                trace!(%addr, "ignoring datagram from non-server address");
                continue;
            }
            delivered += self.handle_datagram(&datagram, bus)?;
        }

        self.advance(dt, bus)?;

        let outgoing = self.outbox.drain();
        if !self.is_connected() {
            if !outgoing.is_empty() {
                debug!(count = outgoing.len(), "dropping messages queued while not connected");
            }
        } else {
            for message in outgoing {
                if let Target::Peer(peer) = message.target {
                    if Some(peer) != self.peer {
                        debug!(%peer, "dropping message addressed to another peer");
                        continue;
                    }
                }
                let result = match self.connection.as_mut() {
                    Some(connection) => {
                        connection.send_message(message.channel, message.tag, message.payload)
                    }
                    None => break,
                };
                if let Err(reason) = result {
                    self.lose(reason, bus);
                    break;
                }
            }
        }
        self.flush()?;
        Ok(delivered)
    }

    fn handle_datagram(&mut self, datagram: &[u8], bus: &EventBus) -> Result<usize, NetError> {
        if self.connection.is_none() {
            return Ok(0);
        }
        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "malformed packet from server");
                self.drop_link(DisconnectReason::Malformed, bus)?;
                return Ok(0);
            }
        };
        let state = self.state();
        if let Some(connection) = self.connection.as_mut() {
            connection.mark_heard();
        }

        match packet {
            Packet::Accept { session, peer } => {
                if state == LinkState::Connecting && session == self.session {
                    self.peer = Some(peer);
                    if let Some(connection) = self.connection.as_mut() {
                        connection.set_state(LinkState::Connected);
                    }
                    info!(%peer, server = %self.server, "connected");
                    bus.publish(ServerConnected { peer });
                    // The server promotes us on our first non-Connect packet.
                    self.queue(&Packet::Heartbeat, bus);
                }
            }
            Packet::Disconnect => {
                let reason = if state == LinkState::Connecting {
                    DisconnectReason::Refused
                } else {
                    DisconnectReason::Requested
                };
                self.lose(reason, bus);
            }
            Packet::Heartbeat | Packet::Connect { .. } => {}
            Packet::Ack { sequence } => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.on_ack(sequence);
                }
            }
            Packet::Message {
                channel,
                sequence,
                tag,
                payload,
            } => {
                if state != LinkState::Connected {
                    trace!("ignoring message before handshake completed");
                    return Ok(0);
                }
                let ready = match self.connection.as_mut() {
                    Some(connection) => connection.receive_message(channel, sequence, tag, payload),
                    None => return Ok(0),
                };
                let ready = match ready {
                    Ok(ready) => ready,
                    Err(reason) => {
                        self.drop_link(reason, bus)?;
                        return Ok(0);
                    }
                };
                let mut delivered = 0;
                for (tag, payload) in ready {
                    match self.registry.dispatch(&(), tag, &payload, bus) {
                        Ok(true) => delivered += 1,
                        Ok(false) => warn!(%tag, "dropping message with unknown tag"),
                        Err(e) => {
                            warn!(
                                message = self.registry.name(tag).unwrap_or("?"),
                                error = %e,
                                "undecodable message from server"
                            );
                            self.drop_link(DisconnectReason::Malformed, bus)?;
                            return Ok(delivered);
                        }
                    }
                }
                return Ok(delivered);
            }
        }
        Ok(0)
    }

    fn advance(&mut self, dt: Duration, bus: &EventBus) -> Result<(), NetError> {
        match self.state() {
            LinkState::Disconnected => Ok(()),
            LinkState::Connecting => {
                self.connecting_for += dt;
                self.since_connect_sent += dt;
                if self.connecting_for >= self.config.timeout {
                    warn!(server = %self.server, "connection attempt timed out");
                    self.lose(DisconnectReason::Timeout, bus);
                    Ok(())
                } else if self.since_connect_sent >= self.config.resend_interval {
                    self.send_connect()
                } else {
                    Ok(())
                }
            }
            LinkState::Connected => {
                let result = match self.connection.as_mut() {
                    Some(connection) => connection.advance(dt, &self.config),
                    None => Ok(()),
                };
                if let Err(reason) = result {
                    self.lose(reason, bus);
                }
                Ok(())
            }
        }
    }

    fn send_connect(&mut self) -> Result<(), NetError> {
        self.since_connect_sent = Duration::ZERO;
        let connect = Packet::Connect {
            session: self.session,
        };
        self.transport.send(self.server, connect.to_bytes()?)
    }

    fn queue(&mut self, packet: &Packet, bus: &EventBus) {
        let result = match self.connection.as_mut() {
            Some(connection) => connection.queue(packet),
            None => return,
        };
        if let Err(reason) = result {
            self.lose(reason, bus);
        }
    }

    fn flush(&mut self) -> Result<(), NetError> {
        if let Some(connection) = self.connection.as_mut() {
            for datagram in connection.drain_outgoing() {
                self.transport.send(self.server, datagram)?;
            }
        }
        Ok(())
    }

    /// End the link after a local decision, telling the server.
    fn drop_link(&mut self, reason: DisconnectReason, bus: &EventBus) -> Result<(), NetError> {
        self.lose(reason, bus);
        self.transport.send(self.server, Packet::Disconnect.to_bytes()?)
    }

    /// Forget the link and announce it.
    fn lose(&mut self, reason: DisconnectReason, bus: &EventBus) {
        if self.connection.take().is_none() {
            return;
        }
        self.peer = None;
        info!(server = %self.server, %reason, "disconnected from server");
        bus.publish(ServerDisconnected { reason });
    }
}

impl Drop for NetworkHost {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            debug!(error = %e, "disconnect on drop failed");
        }
    }
}

impl std::fmt::Debug for NetworkHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHost")
            .field("server", &self.server)
            .field("state", &self.state())
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::events::{FromPeer, PeerDisconnected};
    use crate::server::NetworkServer;
    use crate::transport::MemoryNetwork;

    const TICK: Duration = Duration::from_millis(16);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note(u32);

    impl Message for Note {
        fn type_name() -> &'static str {
            "Note"
        }
    }

    fn record<E: Clone + 'static>(bus: &EventBus) -> (Rc<RefCell<Vec<E>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(move |e: &E| sink.borrow_mut().push(e.clone()));
        (seen, sub)
    }

    struct Pair {
        net: MemoryNetwork,
        server: NetworkServer,
        client: NetworkHost,
        server_bus: EventBus,
        client_bus: EventBus,
    }

    impl Pair {
        fn new(config: NetConfig) -> Self {
            let net = MemoryNetwork::new();
            let mut server = NetworkServer::new(net.bind_any().unwrap(), config.clone());
            server.register::<Note>();
            let mut client = NetworkHost::new(net.bind_any().unwrap(), server.local_addr(), config);
            client.register::<Note>();
            Self {
                net,
                server,
                client,
                server_bus: EventBus::new(),
                client_bus: EventBus::new(),
            }
        }

        fn step(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.client.poll(TICK, &self.client_bus).unwrap();
                self.server.poll(TICK, &self.server_bus).unwrap();
            }
        }
    }

    #[test]
    fn test_handshake_over_memory_network() {
        let mut pair = Pair::new(NetConfig::default());
        let (connected, _c) = record::<ServerConnected>(&pair.client_bus);
        pair.client.connect().unwrap();
        assert_eq!(pair.client.state(), LinkState::Connecting);
        pair.step(3);

        assert!(pair.client.is_connected());
        let peer = pair.client.peer_id().unwrap();
        assert_eq!(*connected.borrow(), vec![ServerConnected { peer }]);
        assert!(pair.server.peer(peer).unwrap().is_connected());
    }

    #[test]
    fn test_messages_flow_both_ways() {
        let mut pair = Pair::new(NetConfig::default());
        let (at_server, _s) = record::<FromPeer<Note>>(&pair.server_bus);
        let (at_client, _c) = record::<Note>(&pair.client_bus);
        pair.client.connect().unwrap();
        pair.step(3);

        pair.client
            .outbox()
            .broadcast(Channel::Reliable, &Note(1))
            .unwrap();
        pair.server
            .outbox()
            .broadcast(Channel::Reliable, &Note(2))
            .unwrap();
        pair.step(2);

        assert_eq!(at_server.borrow().len(), 1);
        assert_eq!(at_server.borrow()[0].message, Note(1));
        assert_eq!(*at_client.borrow(), vec![Note(2)]);
    }

    #[test]
    fn test_reliable_delivery_survives_loss() {
        let config = NetConfig::default().with_resend_interval(Duration::from_millis(32));
        let mut pair = Pair::new(config);
        let (at_client, _c) = record::<Note>(&pair.client_bus);
        pair.client.connect().unwrap();
        pair.step(3);

        let outbox = pair.server.outbox();
        for i in 0..5 {
            outbox.broadcast(Channel::Reliable, &Note(i)).unwrap();
        }
        // Lose the first three datagrams of the burst.
        pair.net.drop_next(3);
        pair.server.poll(TICK, &pair.server_bus).unwrap();
        pair.step(10);

        assert_eq!(*at_client.borrow(), (0..5).map(Note).collect::<Vec<_>>());
        assert_eq!(pair.server.peer(pair.client.peer_id().unwrap()).unwrap().connection.reliable_in_flight(), 0);
    }

    #[test]
    fn test_unreliable_messages_may_be_lost() {
        let mut pair = Pair::new(NetConfig::default());
        let (at_client, _c) = record::<Note>(&pair.client_bus);
        pair.client.connect().unwrap();
        pair.step(3);

        let outbox = pair.server.outbox();
        outbox.broadcast(Channel::Unreliable, &Note(1)).unwrap();
        outbox.broadcast(Channel::Unreliable, &Note(2)).unwrap();
        pair.net.drop_next(1);
        pair.server.poll(TICK, &pair.server_bus).unwrap();
        pair.step(5);
        assert_eq!(*at_client.borrow(), vec![Note(2)]);
    }

    #[test]
    fn test_connect_times_out_without_server() {
        let config = NetConfig::default().with_timeout(Duration::from_millis(100));
        let net = MemoryNetwork::new();
        let nowhere: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut client = NetworkHost::new(net.bind_any().unwrap(), nowhere, config);
        let bus = EventBus::new();
        let (lost, _l) = record::<ServerDisconnected>(&bus);
        client.connect().unwrap();
        for _ in 0..10 {
            client.poll(TICK, &bus).unwrap();
        }
        assert_eq!(
            *lost.borrow(),
            vec![ServerDisconnected {
                reason: DisconnectReason::Timeout
            }]
        );
        assert_eq!(client.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_connect_is_retried_through_loss() {
        let config = NetConfig::default().with_resend_interval(Duration::from_millis(32));
        let mut pair = Pair::new(config);
        pair.net.drop_next(1);
        pair.client.connect().unwrap();
        pair.step(6);
        assert!(pair.client.is_connected());
    }

    #[test]
    fn test_full_server_refuses_client() {
        let mut pair = Pair::new(NetConfig::default().with_max_peers(0));
        let (lost, _l) = record::<ServerDisconnected>(&pair.client_bus);
        pair.client.connect().unwrap();
        pair.step(3);
        assert_eq!(lost.borrow()[0].reason, DisconnectReason::Refused);
        assert!(!pair.client.is_connected());
    }

    #[test]
    fn test_client_disconnect_reaches_server() {
        let mut pair = Pair::new(NetConfig::default());
        let (gone, _g) = record::<PeerDisconnected>(&pair.server_bus);
        pair.client.connect().unwrap();
        pair.step(3);
        pair.client.disconnect().unwrap();
        pair.step(1);
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Requested);
        assert_eq!(pair.server.peer_count(), 0);
    }

    #[test]
    fn test_partitioned_server_times_client_out() {
        let config = NetConfig::default().with_timeout(Duration::from_millis(200));
        let mut pair = Pair::new(config);
        let (lost, _l) = record::<ServerDisconnected>(&pair.client_bus);
        let (gone, _g) = record::<PeerDisconnected>(&pair.server_bus);
        pair.client.connect().unwrap();
        pair.step(3);

        pair.net.partition(pair.server.local_addr());
        pair.step(20);
        assert_eq!(lost.borrow()[0].reason, DisconnectReason::Timeout);
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Timeout);
    }

    #[test]
    fn test_heartbeats_keep_idle_link_alive() {
        let config = NetConfig::default()
            .with_timeout(Duration::from_millis(200))
            .with_heartbeat_interval(Duration::from_millis(50));
        let mut pair = Pair::new(config);
        let (lost, _l) = record::<ServerDisconnected>(&pair.client_bus);
        pair.client.connect().unwrap();
        pair.step(100);
        assert!(pair.client.is_connected());
        assert!(lost.borrow().is_empty());
    }
}
