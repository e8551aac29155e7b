//! Per-connection sequencing and reliability state.
//!
//! Sequences are `u64` and start at zero; they never wrap in practice.

use std::collections::BTreeMap;
use std::time::Duration;

/// Receive side of the unreliable channel: drops anything not newer than
/// the last delivered message.
#[derive(Debug, Default)]
pub struct SequencedReceiver {
    last: Option<u64>,
}

impl SequencedReceiver {
    /// A receiver that has delivered nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a message with `sequence` should be delivered.
    pub fn accept(&mut self, sequence: u64) -> bool {
        match self.last {
            Some(last) if sequence <= last => false,
            _ => {
                self.last = Some(sequence);
                true
            }
        }
    }
}

#[derive(Debug)]
struct InFlight {
    datagram: Vec<u8>,
    since_sent: Duration,
}

/// Send side of the reliable channel: keeps every message until it is
/// acknowledged and hands it back for retransmission.
#[derive(Debug, Default)]
pub struct ReliableSender {
    next_sequence: u64,
    in_flight: BTreeMap<u64, InFlight>,
}

impl ReliableSender {
    /// A sender with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next message will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Store the encoded datagram for the message at
    /// [`next_sequence`](Self::next_sequence) and advance the sequence.
    pub fn push(&mut self, datagram: Vec<u8>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.in_flight.insert(
            sequence,
            InFlight {
                datagram,
                since_sent: Duration::ZERO,
            },
        );
        sequence
    }

    /// Forget an acknowledged message. Returns `false` for unknown or
    /// already acknowledged sequences.
    pub fn ack(&mut self, sequence: u64) -> bool {
        self.in_flight.remove(&sequence).is_some()
    }

    /// Number of unacknowledged messages.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Advance timers by `dt` and collect every datagram that has waited at
    /// least `resend_interval`, oldest first.
    pub fn due(&mut self, dt: Duration, resend_interval: Duration) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        for entry in self.in_flight.values_mut() {
            entry.since_sent += dt;
            if entry.since_sent >= resend_interval {
                entry.since_sent = Duration::ZERO;
                due.push(entry.datagram.clone());
            }
        }
        due
    }
}

/// What the reliable receiver made of one arrival.
#[derive(Debug, PartialEq, Eq)]
pub enum Arrival<T> {
    /// New message. Zero or more messages are now deliverable, in order.
    Accepted(Vec<T>),
    /// Already received; acknowledge again but deliver nothing.
    Duplicate,
    /// Too far ahead of the window; do not acknowledge.
    Rejected,
}

/// Receive side of the reliable channel: buffers out-of-order arrivals and
/// releases them strictly in sequence.
#[derive(Debug)]
pub struct ReliableReceiver<T> {
    next_expected: u64,
    window: u64,
    buffer: BTreeMap<u64, T>,
}

impl<T> ReliableReceiver<T> {
    /// A receiver that buffers at most `window` messages ahead.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            next_expected: 0,
            window: u64::try_from(window.max(1)).unwrap_or(u64::MAX),
            buffer: BTreeMap::new(),
        }
    }

    /// Sequence of the next message to be delivered.
    #[must_use]
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of buffered out-of-order messages.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take message `sequence`. Returns every message now deliverable in order.
    pub fn receive(&mut self, sequence: u64, item: T) -> Arrival<T> {
        if sequence < self.next_expected || self.buffer.contains_key(&sequence) {
            return Arrival::Duplicate;
        }
        if sequence - self.next_expected >= self.window {
            return Arrival::Rejected;
        }
        self.buffer.insert(sequence, item);

        let mut ready = Vec::new();
        while let Some(item) = self.buffer.remove(&self.next_expected) {
            ready.push(item);
            self.next_expected += 1;
        }
        Arrival::Accepted(ready)
    }
}
