//! Configuration loading and management.
//!
//! - [`types`]: top-level [`Config`], server identity, timeouts, collision policy
//! - [`links`]: link blocks and the autoconnect policy
//! - [`limits`]: per-link resource bounds
//! - [`validation`]: startup checks that report every problem at once

mod limits;
mod links;
mod types;
pub mod validation;

pub use limits::LimitsConfig;
pub use links::{AutoconnectConfig, LinkBlock};
pub use types::{
    CollisionConfig, Config, ConfigError, ListenConfig, ServerConfig, TieBreak, TimeoutsConfig,
};
