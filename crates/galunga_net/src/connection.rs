//! Link state shared by server peers and the client host.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{error, trace};

use crate::channel::{Arrival, ReliableReceiver, ReliableSender, SequencedReceiver};
use crate::config::NetConfig;
use crate::message::MessageTypeId;
use crate::packet::{Channel, Packet};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; messages flow.
    Connected,
    /// Terminal.
    Disconnected,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The remote sent `Disconnect`.
    Requested,
    /// Nothing was heard from the remote for the configured timeout.
    Timeout,
    /// The remote sent something that does not decode, or a packet that is
    /// invalid in the current state.
    Malformed,
    /// Too many reliable messages went unacknowledged.
    Overflow,
    /// The same address connected again with a new session.
    Replaced,
    /// The server dropped the peer on purpose.
    Kicked,
    /// The server turned the connection attempt away.
    Refused,
    /// Local shutdown.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Requested => "requested by remote",
            Self::Timeout => "timed out",
            Self::Malformed => "malformed traffic",
            Self::Overflow => "reliable backlog overflow",
            Self::Replaced => "replaced by a new session",
            Self::Kicked => "kicked",
            Self::Refused => "refused",
            Self::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Sequencing, reliability, keep-alive and timeout state for one remote.
///
/// Outgoing datagrams accumulate in the connection until the owner drains
/// them into its transport.
#[derive(Debug)]
pub struct Connection {
    addr: SocketAddr,
    state: LinkState,
    since_heard: Duration,
    since_sent: Duration,
    max_reliable_in_flight: usize,
    unreliable_sequence: u64,
    unreliable_in: SequencedReceiver,
    reliable_out: ReliableSender,
    reliable_in: ReliableReceiver<(MessageTypeId, Vec<u8>)>,
    outgoing: Vec<Vec<u8>>,
}

impl Connection {
    /// A link to `addr` in the `Connecting` state.
    #[must_use]
    pub fn new(addr: SocketAddr, config: &NetConfig) -> Self {
        Self {
            addr,
            state: LinkState::Connecting,
            since_heard: Duration::ZERO,
            since_sent: Duration::ZERO,
            max_reliable_in_flight: config.max_reliable_in_flight,
            unreliable_sequence: 0,
            unreliable_in: SequencedReceiver::new(),
            reliable_out: ReliableSender::new(),
            reliable_in: ReliableReceiver::new(config.max_reliable_in_flight),
            outgoing: Vec::new(),
        }
    }

    /// Address of the remote end.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Move the link to `state`.
    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    /// Time since anything was received from the remote.
    #[must_use]
    pub fn since_heard(&self) -> Duration {
        self.since_heard
    }

    /// Unacknowledged reliable messages.
    #[must_use]
    pub fn reliable_in_flight(&self) -> usize {
        self.reliable_out.in_flight()
    }

    /// Record that a datagram arrived from the remote.
    pub fn mark_heard(&mut self) {
        self.since_heard = Duration::ZERO;
    }

    /// Queue a control packet.
    ///
    /// # Errors
    ///
    /// Returns [`DisconnectReason::Malformed`] if the packet cannot be
    /// encoded.
    pub fn queue(&mut self, packet: &Packet) -> Result<(), DisconnectReason> {
        let datagram = self.encode(packet)?;
        self.outgoing.push(datagram);
        self.since_sent = Duration::ZERO;
        Ok(())
    }

    /// Queue an application message on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`DisconnectReason::Overflow`] when the reliable backlog is
    /// full, or [`DisconnectReason::Malformed`] if encoding fails.
    pub fn send_message(
        &mut self,
        channel: Channel,
        tag: MessageTypeId,
        payload: Vec<u8>,
    ) -> Result<(), DisconnectReason> {
        let sequence = match channel {
            Channel::Unreliable => {
                let sequence = self.unreliable_sequence;
                self.unreliable_sequence += 1;
                sequence
            }
            Channel::Reliable => {
                if self.reliable_out.in_flight() >= self.max_reliable_in_flight {
                    return Err(DisconnectReason::Overflow);
                }
                self.reliable_out.next_sequence()
            }
        };
        let datagram = self.encode(&Packet::Message {
            channel,
            sequence,
            tag,
            payload,
        })?;
        if channel == Channel::Reliable {
            self.reliable_out.push(datagram.clone());
        }
        self.outgoing.push(datagram);
        self.since_sent = Duration::ZERO;
        Ok(())
    }

    /// Feed an inbound message through its channel. Returns the messages
    /// that are now deliverable, in order. Reliable arrivals are
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`DisconnectReason::Malformed`] if the acknowledgement cannot
    /// be encoded.
    pub fn receive_message(
        &mut self,
        channel: Channel,
        sequence: u64,
        tag: MessageTypeId,
        payload: Vec<u8>,
    ) -> Result<Vec<(MessageTypeId, Vec<u8>)>, DisconnectReason> {
        match channel {
            Channel::Unreliable => {
                if self.unreliable_in.accept(sequence) {
                    Ok(vec![(tag, payload)])
                } else {
                    trace!(addr = %self.addr, sequence, "dropped stale unreliable message");
                    Ok(Vec::new())
                }
            }
            Channel::Reliable => match self.reliable_in.receive(sequence, (tag, payload)) {
                Arrival::Accepted(ready) => {
                    self.queue(&Packet::Ack { sequence })?;
                    Ok(ready)
                }
                Arrival::Duplicate => {
                    self.queue(&Packet::Ack { sequence })?;
                    Ok(Vec::new())
                }
                Arrival::Rejected => {
                    trace!(addr = %self.addr, sequence, "reliable message beyond window");
                    Ok(Vec::new())
                }
            },
        }
    }

    /// Handle an acknowledgement from the remote.
    pub fn on_ack(&mut self, sequence: u64) {
        if !self.reliable_out.ack(sequence) {
            trace!(addr = %self.addr, sequence, "ack for unknown sequence");
        }
    }

    /// Advance timers by `dt`: time out a silent remote, retransmit due
    /// reliable messages and send a heartbeat when idle.
    ///
    /// # Errors
    ///
    /// Returns the reason the connection must end.
    pub fn advance(&mut self, dt: Duration, config: &NetConfig) -> Result<(), DisconnectReason> {
        self.since_heard += dt;
        self.since_sent += dt;
        if self.since_heard >= config.timeout {
            return Err(DisconnectReason::Timeout);
        }
        let resends = self.reliable_out.due(dt, config.resend_interval);
        if !resends.is_empty() {
            trace!(addr = %self.addr, count = resends.len(), "retransmitting reliable messages");
            self.outgoing.extend(resends);
            self.since_sent = Duration::ZERO;
        }
        if self.state == LinkState::Connected && self.since_sent >= config.heartbeat_interval {
            self.queue(&Packet::Heartbeat)?;
        }
        Ok(())
    }

    /// Take every datagram queued for sending.
    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, DisconnectReason> {
        packet.to_bytes().map_err(|e| {
            error!(addr = %self.addr, packet = packet.kind(), error = %e, "failed to encode packet");
            DisconnectReason::Malformed
        })
    }
}
