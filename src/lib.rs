//! slircd-link - spanning-tree server linking for the Straylight IRC daemon.
//!
//! Links servers into a tree, keeps the tree and shared state consistent
//! across bursts and netsplits, and routes server-to-server traffic.
//!
//! - [`sync::SyncManager`]: link registry, topology, routing and event bus
//! - [`state::StateStore`]: the shared users, channels and bans the links carry
//! - [`config`]: TOML configuration and validation

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod state;
pub mod sync;
pub mod telemetry;

pub use config::Config;
pub use error::{CommandError, LinkError, RouteError, TopologyError};
pub use state::{NetworkState, StateStore};
pub use sync::SyncManager;
