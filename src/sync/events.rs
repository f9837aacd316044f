//! Typed network event stream.
//!
//! Collaborators (client delivery, services, logging) subscribe to a
//! broadcast channel instead of registering string-keyed hooks. Publishing
//! never blocks; a subscriber that falls behind sees `Lagged` and skips.

use slirc_proto::ServerId;
use tokio::sync::broadcast;

use crate::state::{BanKind, BanRecord, UserRecord};
use crate::sync::session::LinkPhase;

/// Something that happened on the network.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A server joined the tree.
    ServerLinked {
        sid: ServerId,
        name: String,
        parent: ServerId,
        hopcount: u32,
    },
    /// A subtree was detached.
    ServerSplit {
        sid: ServerId,
        name: String,
        /// Every removed server, parent first.
        removed: Vec<ServerId>,
        users_lost: usize,
        reason: String,
    },
    /// A direct link changed protocol phase.
    LinkStateChanged { peer: String, phase: LinkPhase },
    UserIntroduced(UserRecord),
    UserQuit {
        uid: String,
        nick: String,
        reason: String,
    },
    UserKilled {
        uid: String,
        nick: String,
        killer: String,
        reason: String,
    },
    NickChanged {
        uid: String,
        old: String,
        new: String,
    },
    /// Membership or modes of a channel changed.
    ChannelUpdated { channel: String },
    BanAdded(BanRecord),
    BanRemoved { kind: BanKind, mask: String },
    /// A PRIVMSG or NOTICE reached this server for local delivery.
    MessageDelivered {
        source: String,
        target: String,
        text: String,
        notice: bool,
    },
    /// An ENCAP addressed to this server.
    Encap {
        source: String,
        subcommand: String,
        params: Vec<String>,
    },
}

/// Fan-out point for [`NetworkEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NetworkEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Events with no subscriber are dropped.
    pub fn publish(&self, event: NetworkEvent) {
        tracing::trace!(?event, "network event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
