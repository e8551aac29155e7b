//! Server-side peer manager.
//!
//! The [`NetworkServer`] owns the live peer set. Everything it learns from
//! the transport is turned into bus events during [`NetworkServer::poll`],
//! on the caller's thread:
//!
//! 1. Drain queued datagrams (bounded by `max_datagrams_per_poll`), running
//!    the handshake and publishing [`FromPeer`] for delivered messages.
//! 2. Advance timeouts, retransmits and heartbeats.
//! 3. Flush the [`Outbox`] and every peer's queued datagrams.
//!
//! A peer that fails is removed from the live set at once, so nothing it
//! sent later (even within the same poll) is dispatched.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use galunga_bus::{EventBus, Subscription};
use tracing::{debug, info, trace, warn};

use crate::config::NetConfig;
use crate::connection::{DisconnectReason, LinkState};
use crate::error::NetError;
use crate::events::{FromPeer, PeerConnected, PeerDisconnected};
use crate::message::{Message, MessageRegistry};
use crate::outbox::{Outbox, Outgoing, Target};
use crate::packet::{Channel, Packet, SessionId};
use crate::peer::{Peer, PeerId};
use crate::transport::Transport;

/// What one [`NetworkServer::poll`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Datagrams taken from the transport.
    pub datagrams: usize,
    /// Messages published on the bus.
    pub delivered: usize,
    /// Peers removed from the live set.
    pub disconnected: usize,
}

/// Accepts clients and relays their messages onto the event bus.
pub struct NetworkServer {
    transport: Box<dyn Transport>,
    config: NetConfig,
    /// Ordered so timer processing and broadcast fan-out are deterministic.
    peers: BTreeMap<PeerId, Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_peer: u64,
    registry: MessageRegistry<PeerId>,
    outbox: Outbox,
}

impl NetworkServer {
    /// A server accepting peers over `transport`.
    #[must_use]
    pub fn new(transport: impl Transport + 'static, config: NetConfig) -> Self {
        info!(local_addr = %transport.local_addr(), max_peers = config.max_peers, "network server ready");
        Self {
            transport: Box::new(transport),
            config,
            peers: BTreeMap::new(),
            by_addr: HashMap::new(),
            next_peer: 1,
            registry: MessageRegistry::new(),
            outbox: Outbox::new(),
        }
    }

    /// Accept messages of type `M`; each is published as `FromPeer<M>`.
    pub fn register<M: Message>(&mut self) {
        self.registry
            .insert(|peer: &PeerId, message: M, bus: &EventBus| {
                bus.publish(FromPeer {
                    peer: *peer,
                    message,
                });
            });
    }

    /// Handle for queueing outgoing messages.
    #[must_use]
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Broadcast every `M` published on `bus` to all connected peers.
    pub fn replicate<M: Message>(&self, bus: &EventBus, channel: Channel) -> Subscription {
        self.outbox.replicate::<M>(bus, channel)
    }

    /// Returns a reference to the network configuration.
    #[must_use]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Address the transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Live peers, including those still handshaking.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Live peer ids in ascending order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// Returns the peer with `id`, if it is live.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Address of the peer with `id`, if it is live.
    #[must_use]
    pub fn peer_addr(&self, id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&id).map(Peer::addr)
    }

    /// Drain the transport, advance timers by `dt` and flush outgoing
    /// traffic. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] if the transport has failed.
    /// Problems with individual peers disconnect them instead.
    pub fn poll(&mut self, dt: Duration, bus: &EventBus) -> Result<PollStats, NetError> {
        let mut stats = PollStats::default();

        while stats.datagrams < self.config.max_datagrams_per_poll {
            let Some((addr, datagram)) = self.transport.try_recv()? else {
                break;
            };
            stats.datagrams += 1;
            self.handle_datagram(addr, &datagram, bus, &mut stats)?;
        }

        let mut failed = Vec::new();
        for (id, peer) in &mut self.peers {
            if let Err(reason) = peer.connection.advance(dt, &self.config) {
                failed.push((*id, reason));
            }
        }
        for (id, reason) in failed {
            self.drop_peer(id, reason, bus, &mut stats)?;
        }

        for outgoing in self.outbox.drain() {
            self.route(outgoing, bus, &mut stats)?;
        }
        self.flush()?;

        if stats.datagrams > 0 || stats.disconnected > 0 {
            trace!(
                datagrams = stats.datagrams,
                delivered = stats.delivered,
                disconnected = stats.disconnected,
                peers = self.peers.len(),
                "server poll"
            );
        }
        Ok(stats)
    }

    /// Disconnect a peer on purpose.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::UnknownPeer`] if `id` is not live, or
    /// [`NetError::TransportClosed`] if the farewell cannot be sent.
    pub fn kick(&mut self, id: PeerId, bus: &EventBus) -> Result<(), NetError> {
        if !self.peers.contains_key(&id) {
            return Err(NetError::UnknownPeer(id));
        }
        let mut stats = PollStats::default();
        self.drop_peer(id, DisconnectReason::Kicked, bus, &mut stats)
    }

    /// Flush queued traffic, say goodbye to every peer and clear the live
    /// set. Idempotent; also runs on drop.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportClosed`] if the transport has failed.
    pub fn shutdown(&mut self) -> Result<(), NetError> {
        for outgoing in self.outbox.drain() {
            self.send_outgoing(&outgoing);
        }
        self.flush()?;
        let farewell = Packet::Disconnect.to_bytes()?;
        let count = self.peers.len();
        for peer in std::mem::take(&mut self.peers).into_values() {
            self.transport.send(peer.addr(), farewell.clone())?;
        }
        self.by_addr.clear();
        if count > 0 {
            info!(peers = count, "network server shut down");
        }
        Ok(())
    }

    fn handle_datagram(
        &mut self,
        addr: SocketAddr,
        datagram: &[u8],
        bus: &EventBus,
        stats: &mut PollStats,
    ) -> Result<(), NetError> {
        let known = self.by_addr.get(&addr).copied();
        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                match known {
                    Some(id) => {
                        warn!(peer = %id, %addr, error = %e, "malformed packet");
                        self.drop_peer(id, DisconnectReason::Malformed, bus, stats)?;
                    }
                    None => debug!(%addr, error = %e, "ignoring malformed packet from stranger"),
                }
                return Ok(());
            }
        };

        let Some(id) = known else {
            if let Packet::Connect { session } = packet {
                self.admit(addr, session, bus, stats)?;
            } else {
                trace!(%addr, packet = packet.kind(), "ignoring packet from unknown address");
            }
            return Ok(());
        };

        if let Packet::Connect { session } = packet {
            let current = self.peers.get(&id).map(Peer::session);
            if current == Some(session) {
                self.queue_to(id, &Packet::Accept { session, peer: id }, bus, stats)?;
            } else {
                self.drop_peer(id, DisconnectReason::Replaced, bus, stats)?;
                self.admit(addr, session, bus, stats)?;
            }
            return Ok(());
        }

        let Some(peer) = self.peers.get_mut(&id) else {
            return Ok(());
        };
        peer.connection.mark_heard();
        if peer.state() == LinkState::Connecting && packet == Packet::Disconnect {
            self.peers.remove(&id);
            self.by_addr.remove(&addr);
            info!(peer = %id, %addr, "peer left before the handshake completed");
            return Ok(());
        }
        if peer.state() == LinkState::Connecting {
            peer.connection.set_state(LinkState::Connected);
            info!(peer = %id, %addr, "peer connected");
            bus.publish(PeerConnected { peer: id, addr });
        }

        match packet {
            Packet::Connect { .. } | Packet::Heartbeat => {}
            Packet::Disconnect => {
                self.remove_peer(id, DisconnectReason::Requested, bus, stats);
            }
            Packet::Ack { sequence } => {
                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.connection.on_ack(sequence);
                }
            }
            Packet::Accept { .. } => {
                warn!(peer = %id, "peer sent accept");
                self.drop_peer(id, DisconnectReason::Malformed, bus, stats)?;
            }
            Packet::Message {
                channel,
                sequence,
                tag,
                payload,
            } => {
                let ready = match self.peers.get_mut(&id) {
                    Some(peer) => peer.connection.receive_message(channel, sequence, tag, payload),
                    None => return Ok(()),
                };
                let ready = match ready {
                    Ok(ready) => ready,
                    Err(reason) => return self.drop_peer(id, reason, bus, stats),
                };
                for (tag, payload) in ready {
                    match self.registry.dispatch(&id, tag, &payload, bus) {
                        Ok(true) => stats.delivered += 1,
                        Ok(false) => warn!(peer = %id, %tag, "dropping message with unknown tag"),
                        Err(e) => {
                            warn!(
                                peer = %id,
                                message = self.registry.name(tag).unwrap_or("?"),
                                error = %e,
                                "undecodable message"
                            );
                            return self.drop_peer(id, DisconnectReason::Malformed, bus, stats);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn admit(
        &mut self,
        addr: SocketAddr,
        session: SessionId,
        bus: &EventBus,
        stats: &mut PollStats,
    ) -> Result<(), NetError> {
        if self.peers.len() >= self.config.max_peers {
            warn!(%addr, max_peers = self.config.max_peers, "refusing connection: server full");
            return self.transport.send(addr, Packet::Disconnect.to_bytes()?);
        }
        let id = PeerId(self.next_peer);
        self.next_peer += 1;
        self.peers
            .insert(id, Peer::new(id, addr, session, &self.config));
        self.by_addr.insert(addr, id);
        debug!(peer = %id, %addr, "peer handshaking");
        self.queue_to(id, &Packet::Accept { session, peer: id }, bus, stats)
    }

    fn queue_to(
        &mut self,
        id: PeerId,
        packet: &Packet,
        bus: &EventBus,
        stats: &mut PollStats,
    ) -> Result<(), NetError> {
        let result = match self.peers.get_mut(&id) {
            Some(peer) => peer.connection.queue(packet),
            None => return Ok(()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(reason) => self.drop_peer(id, reason, bus, stats),
        }
    }

    fn route(&mut self, outgoing: Outgoing, bus: &EventBus, stats: &mut PollStats) -> Result<(), NetError> {
        let targets: Vec<PeerId> = match outgoing.target {
            Target::Peer(id) => match self.peers.get(&id) {
                Some(peer) if peer.is_connected() => vec![id],
                _ => {
                    debug!(peer = %id, tag = %outgoing.tag, "dropping message for peer not connected");
                    Vec::new()
                }
            },
            Target::All => self
                .peers
                .values()
                .filter(|p| p.is_connected())
                .map(Peer::id)
                .collect(),
        };
        for id in targets {
            let result = match self.peers.get_mut(&id) {
                Some(peer) => peer.connection.send_message(
                    outgoing.channel,
                    outgoing.tag,
                    outgoing.payload.clone(),
                ),
                None => continue,
            };
            if let Err(reason) = result {
                self.drop_peer(id, reason, bus, stats)?;
            }
        }
        Ok(())
    }

    /// Best-effort send used during shutdown; a peer that cannot take the
    /// message is about to be disconnected anyway.
    fn send_outgoing(&mut self, outgoing: &Outgoing) {
        for peer in self.peers.values_mut().filter(|p| p.is_connected()) {
            let wanted = match outgoing.target {
                Target::All => true,
                Target::Peer(id) => id == peer.id(),
            };
            if !wanted {
                continue;
            }
            if let Err(reason) =
                peer.connection
                    .send_message(outgoing.channel, outgoing.tag, outgoing.payload.clone())
            {
                debug!(peer = %peer.id(), tag = %outgoing.tag, %reason, "dropping message during shutdown");
            }
        }
    }

    fn flush(&mut self) -> Result<(), NetError> {
        for peer in self.peers.values_mut() {
            let addr = peer.addr();
            for datagram in peer.connection.drain_outgoing() {
                self.transport.send(addr, datagram)?;
            }
        }
        Ok(())
    }

    /// Remove a peer after a local decision, telling it so.
    fn drop_peer(
        &mut self,
        id: PeerId,
        reason: DisconnectReason,
        bus: &EventBus,
        stats: &mut PollStats,
    ) -> Result<(), NetError> {
        if let Some(addr) = self.remove_peer(id, reason, bus, stats) {
            self.transport.send(addr, Packet::Disconnect.to_bytes()?)?;
        }
        Ok(())
    }

    /// Remove a peer from the live set, discarding anything still queued
    /// for it, and announce it.
    fn remove_peer(
        &mut self,
        id: PeerId,
        reason: DisconnectReason,
        bus: &EventBus,
        stats: &mut PollStats,
    ) -> Option<SocketAddr> {
        let peer = self.peers.remove(&id)?;
        let addr = peer.addr();
        self.by_addr.remove(&addr);
        stats.disconnected += 1;
        info!(peer = %id, %addr, %reason, "peer disconnected");
        bus.publish(PeerDisconnected {
            peer: id,
            addr,
            reason,
        });
        Some(addr)
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!(error = %e, "network server shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("local_addr", &self.transport.local_addr())
            .field("peers", &self.peers.len())
            .field("messages", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::codec;
    use crate::message::MessageTypeId;
    use crate::transport::{MemoryNetwork, MemoryTransport};

    const TICK: Duration = Duration::from_millis(16);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chat(String);

    impl Message for Chat {
        fn type_name() -> &'static str {
            "Chat"
        }
    }

    /// A hand-driven client speaking raw packets.
    struct RawClient {
        transport: MemoryTransport,
        server: SocketAddr,
        session: SessionId,
        reliable: u64,
    }

    impl RawClient {
        fn new(net: &MemoryNetwork, server: SocketAddr) -> Self {
            Self {
                transport: net.bind_any().unwrap(),
                server,
                session: SessionId::random(),
                reliable: 0,
            }
        }

        fn send(&mut self, packet: &Packet) {
            self.transport
                .send(self.server, packet.to_bytes().unwrap())
                .unwrap();
        }

        fn send_raw(&mut self, bytes: Vec<u8>) {
            self.transport.send(self.server, bytes).unwrap();
        }

        fn chat(&mut self, text: &str) {
            let packet = Packet::Message {
                channel: Channel::Reliable,
                sequence: self.reliable,
                tag: Chat::message_type_id(),
                payload: codec::encode(&Chat(text.into())).unwrap(),
            };
            self.reliable += 1;
            self.send(&packet);
        }

        fn received(&mut self) -> Vec<Packet> {
            let mut packets = Vec::new();
            while let Some((_, bytes)) = self.transport.try_recv().unwrap() {
                packets.push(Packet::from_bytes(&bytes).unwrap());
            }
            packets
        }

        fn connect(&mut self, server: &mut NetworkServer, bus: &EventBus) -> PeerId {
            let session = self.session;
            self.send(&Packet::Connect { session });
            server.poll(TICK, bus).unwrap();
            let peer = self
                .received()
                .into_iter()
                .find_map(|p| match p {
                    Packet::Accept { peer, .. } => Some(peer),
                    _ => None,
                })
                .unwrap();
            self.send(&Packet::Heartbeat);
            server.poll(TICK, bus).unwrap();
            peer
        }
    }

    fn setup(config: NetConfig) -> (MemoryNetwork, NetworkServer, EventBus) {
        let net = MemoryNetwork::new();
        let mut server = NetworkServer::new(net.bind_any().unwrap(), config);
        server.register::<Chat>();
        (net, server, EventBus::new())
    }

    fn record<E: Clone + 'static>(bus: &EventBus) -> (Rc<RefCell<Vec<E>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(move |e: &E| sink.borrow_mut().push(e.clone()));
        (seen, sub)
    }

    #[test]
    fn test_idle_server_publishes_nothing() {
        let (_net, mut server, bus) = setup(NetConfig::default());
        let (connected, _c) = record::<PeerConnected>(&bus);
        let (chats, _m) = record::<FromPeer<Chat>>(&bus);
        for _ in 0..1000 {
            assert_eq!(server.poll(TICK, &bus).unwrap(), PollStats::default());
        }
        assert!(connected.borrow().is_empty());
        assert!(chats.borrow().is_empty());
        assert_eq!(server.peer_count(), 0);
    }

    #[test]
    fn test_handshake_connects_on_first_non_connect_packet() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (connected, _sub) = record::<PeerConnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());

        let session = client.session;
        client.send(&Packet::Connect { session });
        server.poll(TICK, &bus).unwrap();
        assert_eq!(server.peer_count(), 1);
        assert!(connected.borrow().is_empty());
        let peer = server.peers().next().unwrap();
        assert_eq!(server.peer(peer).unwrap().state(), LinkState::Connecting);
        assert_eq!(client.received(), vec![Packet::Accept { session, peer }]);

        // A retransmitted Connect is answered again, not treated as new.
        client.send(&Packet::Connect { session });
        server.poll(TICK, &bus).unwrap();
        assert_eq!(client.received(), vec![Packet::Accept { session, peer }]);
        assert_eq!(server.peer_count(), 1);

        client.send(&Packet::Heartbeat);
        server.poll(TICK, &bus).unwrap();
        assert_eq!(
            *connected.borrow(),
            vec![PeerConnected {
                peer,
                addr: client.transport.local_addr()
            }]
        );
        assert_eq!(server.peer_addr(peer), Some(client.transport.local_addr()));
    }

    #[test]
    fn test_disconnect_during_handshake_is_not_announced() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (connected, _c) = record::<PeerConnected>(&bus);
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());

        let session = client.session;
        client.send(&Packet::Connect { session });
        server.poll(TICK, &bus).unwrap();
        assert_eq!(server.peer_count(), 1);

        client.send(&Packet::Disconnect);
        server.poll(TICK, &bus).unwrap();
        assert!(connected.borrow().is_empty());
        assert!(gone.borrow().is_empty());
        assert_eq!(server.peer_count(), 0);

        // The address is free for a fresh handshake.
        client.received();
        client.session = SessionId::random();
        let peer = client.connect(&mut server, &bus);
        assert_eq!(connected.borrow().len(), 1);
        assert_eq!(connected.borrow()[0].peer, peer);
    }

    #[test]
    fn test_messages_are_published_with_sender() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (chats, _sub) = record::<FromPeer<Chat>>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        let peer = client.connect(&mut server, &bus);

        client.chat("hello");
        let stats = server.poll(TICK, &bus).unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(
            *chats.borrow(),
            vec![FromPeer {
                peer,
                message: Chat("hello".into())
            }]
        );
        assert!(client.received().contains(&Packet::Ack { sequence: 0 }));
    }

    #[test]
    fn test_disconnect_mid_poll_discards_later_messages() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (chats, _c) = record::<FromPeer<Chat>>(&bus);
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        let peer = client.connect(&mut server, &bus);

        client.chat("before");
        client.send(&Packet::Disconnect);
        client.chat("after");
        server.poll(TICK, &bus).unwrap();

        assert_eq!(chats.borrow().len(), 1);
        assert_eq!(chats.borrow()[0].message, Chat("before".into()));
        assert_eq!(gone.borrow().len(), 1);
        assert_eq!(gone.borrow()[0].peer, peer);
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Requested);
        assert_eq!(server.peer_count(), 0);
        assert!(server.peer(peer).is_none());
    }

    #[test]
    fn test_malformed_packet_disconnects_only_that_peer() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut bad = RawClient::new(&net, server.local_addr());
        let mut good = RawClient::new(&net, server.local_addr());
        let bad_id = bad.connect(&mut server, &bus);
        let good_id = good.connect(&mut server, &bus);

        bad.send_raw(vec![0xc1, 0x00]);
        server.poll(TICK, &bus).unwrap();

        assert_eq!(gone.borrow().len(), 1);
        assert_eq!(gone.borrow()[0].peer, bad_id);
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Malformed);
        assert!(bad.received().contains(&Packet::Disconnect));
        assert_eq!(server.peers().collect::<Vec<_>>(), vec![good_id]);
    }

    #[test]
    fn test_undecodable_payload_disconnects() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        client.connect(&mut server, &bus);

        client.send(&Packet::Message {
            channel: Channel::Unreliable,
            sequence: 0,
            tag: Chat::message_type_id(),
            payload: vec![0xc1],
        });
        server.poll(TICK, &bus).unwrap();
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Malformed);
    }

    #[test]
    fn test_unknown_tag_is_dropped_without_disconnect() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        client.connect(&mut server, &bus);

        client.send(&Packet::Message {
            channel: Channel::Unreliable,
            sequence: 0,
            tag: MessageTypeId::from_name("NotRegistered"),
            payload: vec![],
        });
        let stats = server.poll(TICK, &bus).unwrap();
        assert_eq!(stats.delivered, 0);
        assert!(gone.borrow().is_empty());
        assert_eq!(server.peer_count(), 1);
    }

    #[test]
    fn test_full_server_refuses() {
        let (net, mut server, bus) = setup(NetConfig::default().with_max_peers(1));
        let mut first = RawClient::new(&net, server.local_addr());
        first.connect(&mut server, &bus);
        let mut second = RawClient::new(&net, server.local_addr());
        let session = second.session;
        second.send(&Packet::Connect { session });
        server.poll(TICK, &bus).unwrap();
        assert_eq!(second.received(), vec![Packet::Disconnect]);
        assert_eq!(server.peer_count(), 1);
    }

    #[test]
    fn test_new_session_replaces_peer() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        let old = client.connect(&mut server, &bus);

        client.session = SessionId::random();
        let new = client.connect(&mut server, &bus);
        assert_ne!(old, new);
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Replaced);
        assert_eq!(server.peers().collect::<Vec<_>>(), vec![new]);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let config = NetConfig::default().with_timeout(Duration::from_millis(100));
        let (net, mut server, bus) = setup(config);
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        let peer = client.connect(&mut server, &bus);

        for _ in 0..10 {
            server.poll(Duration::from_millis(20), &bus).unwrap();
        }
        assert_eq!(gone.borrow()[0].peer, peer);
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Timeout);
        assert_eq!(server.peer_count(), 0);
    }

    #[test]
    fn test_idle_peer_receives_heartbeats() {
        let config = NetConfig::default().with_heartbeat_interval(Duration::from_millis(50));
        let (net, mut server, bus) = setup(config);
        let mut client = RawClient::new(&net, server.local_addr());
        client.connect(&mut server, &bus);
        client.received();

        for _ in 0..4 {
            server.poll(TICK, &bus).unwrap();
        }
        assert!(client.received().contains(&Packet::Heartbeat));
    }

    #[test]
    fn test_outbox_reaches_connected_peers_only() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let mut connected = RawClient::new(&net, server.local_addr());
        let peer = connected.connect(&mut server, &bus);
        connected.received();
        let mut pending = RawClient::new(&net, server.local_addr());
        let session = pending.session;
        pending.send(&Packet::Connect { session });
        server.poll(TICK, &bus).unwrap();
        pending.received();

        let _sub = server.replicate::<Chat>(&bus, Channel::Reliable);
        bus.publish(Chat("all".into()));
        server.outbox().send_to(peer, Channel::Unreliable, &Chat("you".into())).unwrap();
        server.poll(TICK, &bus).unwrap();

        let messages: Vec<Chat> = connected
            .received()
            .into_iter()
            .filter_map(|p| match p {
                Packet::Message { payload, .. } => Some(codec::decode(&payload).unwrap()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec![Chat("all".into()), Chat("you".into())]);
        assert!(pending.received().is_empty());
    }

    #[test]
    fn test_kick_and_unknown_peer() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let (gone, _g) = record::<PeerDisconnected>(&bus);
        let mut client = RawClient::new(&net, server.local_addr());
        let peer = client.connect(&mut server, &bus);
        server.kick(peer, &bus).unwrap();
        assert_eq!(gone.borrow()[0].reason, DisconnectReason::Kicked);
        assert!(matches!(
            server.kick(peer, &bus),
            Err(NetError::UnknownPeer(p)) if p == peer
        ));
    }

    #[test]
    fn test_shutdown_says_goodbye() {
        let (net, mut server, bus) = setup(NetConfig::default());
        let mut client = RawClient::new(&net, server.local_addr());
        client.connect(&mut server, &bus);
        client.received();
        server.shutdown().unwrap();
        assert_eq!(server.peer_count(), 0);
        assert_eq!(client.received(), vec![Packet::Disconnect]);
    }

    #[test]
    fn test_shutdown_with_full_backlog_still_says_goodbye() {
        let config = NetConfig::default().with_max_reliable_in_flight(2);
        let (net, mut server, bus) = setup(config);
        let mut client = RawClient::new(&net, server.local_addr());
        client.connect(&mut server, &bus);
        client.received();

        let outbox = server.outbox();
        for i in 0..5 {
            outbox.broadcast(Channel::Reliable, &Chat(format!("bye {i}"))).unwrap();
        }
        server.shutdown().unwrap();

        let received = client.received();
        let messages = received
            .iter()
            .filter(|p| matches!(p, Packet::Message { .. }))
            .count();
        assert_eq!(messages, 2);
        assert_eq!(received.last(), Some(&Packet::Disconnect));
        assert_eq!(server.peer_count(), 0);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_datagram_budget_bounds_one_poll() {
        let (net, mut server, bus) =
            setup(NetConfig::default().with_max_datagrams_per_poll(2));
        let mut client = RawClient::new(&net, server.local_addr());
        for _ in 0..5 {
            client.send(&Packet::Heartbeat);
        }
        assert_eq!(server.poll(TICK, &bus).unwrap().datagrams, 2);
        assert_eq!(server.poll(TICK, &bus).unwrap().datagrams, 2);
        assert_eq!(server.poll(TICK, &bus).unwrap().datagrams, 1);
    }
}
