//! Server-to-server link configuration.

use std::time::Duration;

use serde::Deserialize;

/// Link block: one configured peer.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name (e.g., "leaf.straylight.net").
    pub name: String,
    /// Remote server IP/hostname to connect to.
    pub hostname: String,
    /// Remote server port.
    pub port: u16,
    /// Shared secret; both ends must configure the same value.
    pub password: String,
    /// Whether the autoconnect loop dials this peer. `false` means the link
    /// is only ever made by the peer or by an operator CONNECT.
    #[serde(default)]
    pub autoconnect: bool,
    /// Expected remote SID (optional, for validation).
    pub sid: Option<String>,
}

impl LinkBlock {
    /// `hostname:port` for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Autoconnect loop timing, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoconnectConfig {
    /// Interval between scheduler ticks.
    #[serde(default = "default_tick")]
    pub tick: u64,
    /// First retry delay after a failure.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: u64,
    /// Upper bound for the doubling retry delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
}

impl Default for AutoconnectConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl AutoconnectConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff)
    }
}

fn default_tick() -> u64 {
    5
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    300
}
