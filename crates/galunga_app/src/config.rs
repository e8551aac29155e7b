//! Application configuration.
//!
//! Layers, lowest precedence first: built-in defaults, an optional JSON
//! file, `GALUNGA_*` environment variables, then command-line flags (the
//! binaries apply those last).

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result, bail};
use galunga_net::NetConfig;
use galunga_system::CollisionConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tick::TickConfig;

/// Address a client connects to when nothing else is configured.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:7777";
/// Address the server binds when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7777";

pub const ENV_SERVER_ADDR: &str = "GALUNGA_SERVER_ADDR";
pub const ENV_BIND_ADDR: &str = "GALUNGA_BIND_ADDR";
pub const ENV_TICK_RATE: &str = "GALUNGA_TICK_RATE";

/// Everything the client and server binaries are configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server the client connects to.
    pub server_addr: SocketAddr,
    /// Local address to bind. `None` means the role's default: the
    /// well-known port for the server, an ephemeral one for the client.
    pub bind_addr: Option<SocketAddr>,
    pub tick: TickConfig,
    pub net: NetConfig,
    pub collision: CollisionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            bind_addr: None,
            tick: TickConfig::default(),
            net: NetConfig::default(),
            collision: CollisionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with `path` if given, then with the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, an environment override
    /// is malformed, or the result does not [validate](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid JSON for this type.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// # Errors
    ///
    /// Fails if `text` is not valid JSON for this type.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply `GALUNGA_*` overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// Fails if a set variable does not parse.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = var(ENV_SERVER_ADDR) {
            self.server_addr = value
                .parse()
                .with_context(|| format!("{ENV_SERVER_ADDR}={value:?} is not a socket address"))?;
        }
        if let Some(value) = var(ENV_BIND_ADDR) {
            self.bind_addr = Some(
                value
                    .parse()
                    .with_context(|| format!("{ENV_BIND_ADDR}={value:?} is not a socket address"))?,
            );
        }
        if let Some(value) = var(ENV_TICK_RATE) {
            self.tick.tick_rate = value
                .parse()
                .with_context(|| format!("{ENV_TICK_RATE}={value:?} is not a number"))?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on a tick rate or network setting the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.tick.is_valid() {
            bail!("tick_rate must be a positive number, got {}", self.tick.tick_rate);
        }
        if self.net.timeout.is_zero() {
            bail!("net.timeout must be nonzero");
        }
        if self.net.heartbeat_interval >= self.net.timeout {
            bail!(
                "net.heartbeat_interval ({:?}) must be shorter than net.timeout ({:?})",
                self.net.heartbeat_interval,
                self.net.timeout
            );
        }
        if self.net.max_datagrams_per_poll == 0 {
            bail!("net.max_datagrams_per_poll must be nonzero");
        }
        Ok(())
    }

    /// Address the server binds, `0.0.0.0:7777` unless configured.
    #[must_use]
    pub fn server_bind_addr(&self) -> SocketAddr {
        self.bind_addr
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 7777)))
    }

    /// Address the client binds, any port unless configured.
    #[must_use]
    pub fn client_bind_addr(&self) -> SocketAddr {
        self.bind_addr
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use galunga_system::ContactPolicy;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server_addr, DEFAULT_SERVER_ADDR.parse().unwrap());
        assert_eq!(config.server_bind_addr(), DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.client_bind_addr().port(), 0);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "server_addr": "10.0.0.5:9000",
                "tick": { "tick_rate": 30.0 },
                "net": { "timeout": 2000 },
                "collision": { "policy": "continuous" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.server_addr, "10.0.0.5:9000".parse().unwrap());
        assert_eq!(config.tick.tick_rate, 30.0);
        assert_eq!(config.tick.max_ticks, 0);
        assert_eq!(config.net.timeout, Duration::from_secs(2));
        assert_eq!(config.net.max_peers, NetConfig::default().max_peers);
        assert_eq!(config.collision.policy, ContactPolicy::Continuous);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(AppConfig::from_json("{ \"tick\": 5 }").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                (ENV_SERVER_ADDR, "192.168.1.2:4000"),
                (ENV_BIND_ADDR, "127.0.0.1:5000"),
                (ENV_TICK_RATE, "120"),
            ]))
            .unwrap();
        assert_eq!(config.server_addr, "192.168.1.2:4000".parse().unwrap());
        assert_eq!(config.server_bind_addr(), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.client_bind_addr(), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.tick.tick_rate, 120.0);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[(ENV_TICK_RATE, "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TICK_RATE));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.tick.tick_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.net.heartbeat_interval = config.net.timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let path = std::env::temp_dir().join(format!("galunga-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "tick": { "max_ticks": 42 } }"#).unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.tick.max_ticks, 42);
        assert!(AppConfig::from_file(&path).is_err());
    }
}
