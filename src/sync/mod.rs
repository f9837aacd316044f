//! Sync Module - Server-to-Server Linking.
//!
//! This module manages the spanning tree of linked servers: handshakes,
//! bursts, routing, collision handling, netsplits and autoconnect.

pub mod autoconnect;
pub mod burst;
pub mod collision;
pub mod events;
pub mod link;
pub mod manager;
pub mod network;
pub mod protocol;
pub mod router;
pub mod session;
pub mod split;
pub mod topology;

pub use autoconnect::AutoconnectScheduler;
pub use events::{EventBus, NetworkEvent};
pub use link::LinkHandle;
pub use manager::{LocalEvent, Propagation, SyncManager, RCONNECT, RSQUIT};
pub use network::{BoxedStream, Dialer, LinkReport, TcpDialer};
pub use router::{RouteClass, Router, Target};
pub use session::{Action, Direction, LinkPhase, LinkSession, LocalIdentity, PeerIdentity};
pub use split::SplitOutcome;
pub use topology::{LinkEntry, NewServer, ServerNode, ServerState, TopologyGraph};
