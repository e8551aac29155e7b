//! Connection tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and capacity limits shared by the server and the client host.
///
/// Durations are written as milliseconds in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// A remote that has been silent this long is disconnected.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Send a heartbeat after this long without sending anything else.
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Retransmit unacknowledged reliable messages (and the client's
    /// `Connect`) this often.
    #[serde(with = "millis")]
    pub resend_interval: Duration,
    /// Connection attempts beyond this many live peers are refused.
    pub max_peers: usize,
    /// Upper bound on datagrams drained by one `poll`.
    pub max_datagrams_per_poll: usize,
    /// A connection with more unacknowledged reliable messages than this is
    /// dropped. Also the receive window for out-of-order reliable messages.
    pub max_reliable_in_flight: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_millis(500),
            resend_interval: Duration::from_millis(150),
            max_peers: 64,
            max_datagrams_per_poll: 1024,
            max_reliable_in_flight: 256,
        }
    }
}

impl NetConfig {
    /// Drop links silent for longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a heartbeat after `interval` without traffic.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Retransmit unacknowledged reliable messages after `interval`.
    #[must_use]
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    /// Refuse connections beyond `max_peers`.
    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Read at most `max` datagrams per poll.
    #[must_use]
    pub fn with_max_datagrams_per_poll(mut self, max: usize) -> Self {
        self.max_datagrams_per_poll = max;
        self
    }

    /// Allow at most `max` unacknowledged reliable messages per link.
    #[must_use]
    pub fn with_max_reliable_in_flight(mut self, max: usize) -> Self {
        self.max_reliable_in_flight = max;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Write a duration as whole milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Read a duration from whole milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_defaults() {
        let config = NetConfig::default()
            .with_timeout(Duration::from_secs(1))
            .with_max_peers(2);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_peers, 2);
        assert_eq!(config.heartbeat_interval, NetConfig::default().heartbeat_interval);
    }

    #[test]
    fn test_durations_are_milliseconds_on_the_wire() {
        let config = NetConfig::default().with_resend_interval(Duration::from_millis(75));
        let bytes = rmp_serde::to_vec_named(&config).unwrap();
        let restored: NetConfig = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, config);
    }
}
