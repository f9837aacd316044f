//! Per-link resource limits.

use serde::Deserialize;

/// Bounds applied to every server link.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum queued outbound lines per link before the link is dropped
    /// with a send queue overflow.
    #[serde(default = "default_sendq_lines")]
    pub sendq_lines: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            sendq_lines: default_sendq_lines(),
        }
    }
}

fn default_sendq_lines() -> usize {
    4096
}
