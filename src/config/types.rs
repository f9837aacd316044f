//! Core configuration types and loading.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::limits::LimitsConfig;
use super::links::{AutoconnectConfig, LinkBlock};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Local server identity.
    pub server: ServerConfig,
    /// Inbound link listener. Without it the server only dials out.
    pub listen: Option<ListenConfig>,
    /// Liveness, handshake and burst timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Per-link resource bounds.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Autoconnect loop timing.
    #[serde(default)]
    pub autoconnect: AutoconnectConfig,
    /// Identifier collision policy.
    #[serde(default)]
    pub collision: CollisionConfig,
    /// Link blocks for server peering.
    #[serde(default)]
    pub links: Vec<LinkBlock>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find a link block by server name (case-insensitive).
    pub fn link(&self, name: &str) -> Option<&LinkBlock> {
        self.links
            .iter()
            .find(|l| slirc_proto::irc_eq(&l.name, name))
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "hub.straylight.net").
    pub name: String,
    /// Server ID, `[0-9][A-Z0-9][A-Z0-9]`.
    pub sid: String,
    /// Description sent in SERVER introductions.
    #[serde(default)]
    pub description: String,
    /// Network name.
    pub network: String,
    /// Prometheus endpoint port. Disabled when unset.
    pub metrics_port: Option<u16>,
}

/// Inbound listener for server links.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    pub address: SocketAddr,
}

/// Link timeouts, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// Idle time on an established link before a PING is sent (default: 60).
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Idle time after which the link is declared dead (default: 120).
    /// Must exceed `ping_interval`.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    /// Time allowed to get from connect to burst (default: 60).
    #[serde(default = "default_handshake_timeout")]
    pub handshake: u64,
    /// Time allowed for the peer's burst to end (default: 120).
    #[serde(default = "default_burst_timeout")]
    pub burst: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            handshake: default_handshake_timeout(),
            burst: default_burst_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake)
    }

    pub fn burst(&self) -> Duration {
        Duration::from_secs(self.burst)
    }
}

fn default_ping_interval() -> u64 {
    60
}

fn default_ping_timeout() -> u64 {
    120
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_burst_timeout() -> u64 {
    120
}

/// How to settle two claims on one identifier with equal timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The claim whose UID sorts first survives.
    #[default]
    LowerId,
    /// The claim whose UID sorts last survives.
    HigherId,
    /// Neither survives.
    KillBoth,
}

/// Collision policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollisionConfig {
    #[serde(default)]
    pub tie_break: TieBreak,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        name = "hub.example.net"
        sid = "00A"
        network = "ExampleNet"
    "#;

    // ========================================================================
    // Defaults
    // ========================================================================

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert!(config.listen.is_none());
        assert!(config.links.is_empty());
        assert_eq!(config.timeouts.ping_interval, 60);
        assert_eq!(config.timeouts.ping_timeout, 120);
        assert_eq!(config.limits.sendq_lines, 4096);
        assert_eq!(config.collision.tie_break, TieBreak::LowerId);
    }

    #[test]
    fn tie_break_parses_kebab_case() {
        let text = format!("{MINIMAL}\n[collision]\ntie_break = \"kill-both\"\n");
        let config = Config::from_toml(&text).unwrap();
        assert_eq!(config.collision.tie_break, TieBreak::KillBoth);
    }

    // ========================================================================
    // Loading
    // ========================================================================

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.toml");
        let text = format!(
            "{MINIMAL}\n[listen]\naddress = \"127.0.0.1:7000\"\n\n\
             [[links]]\nname = \"Leaf.Example.Net\"\nhostname = \"127.0.0.1\"\n\
             port = 7001\npassword = \"pw\"\nautoconnect = true\n"
        );
        std::fs::write(&path, text).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.links.len(), 1);
        assert!(config.link("leaf.example.net").is_some());
        assert_eq!(
            config.listen.map(|l| l.address.port()),
            Some(7000)
        );
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::from_toml("[server\nname=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
