//! Shared network state as seen by the linking core.
//!
//! The core does not own users, channels or bans. It reaches them through
//! [`StateStore`]: it asks the store to apply a change and gets back either
//! acceptance or a [`Rejection`] it can act on (for example, a nick
//! collision that has to be settled with a KILL). [`NetworkState`] is the
//! in-memory store the daemon runs with.

mod network;
mod records;
mod uid;

use std::collections::{HashMap, HashSet};

use slirc_proto::ServerId;
use thiserror::Error;

pub use network::NetworkState;
pub use records::{
    apply_mode_delta, split_mode_change, BanKind, BanRecord, ChannelRecord, StateSnapshot,
    UserRecord, MAX_MODE_ARGS, STATUS_MODES,
};
pub use uid::UidGenerator;

/// A single mutation of shared state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// Add a user. Fails if the UID or nick is taken.
    IntroduceUser(UserRecord),
    /// Remove a user and its channel memberships.
    RemoveUser { uid: String },
    /// Change a nick. Fails if the new nick is held by someone else.
    ChangeNick { uid: String, nick: String, ts: u64 },
    SetUserModes { uid: String, modes: String },
    /// Merge a channel burst using timestamp rules.
    MergeChannel(ChannelRecord),
    /// Apply a timestamped mode change; ignored if the timestamp is newer
    /// than the channel's.
    ChannelMode {
        channel: String,
        ts: u64,
        modes: String,
        args: Vec<String>,
    },
    Part { channel: String, uid: String },
    /// Add a ban; an older ban on the same mask is kept.
    AddBan(BanRecord),
    RemoveBan { kind: BanKind, mask: String },
}

/// Result of an accepted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// State changed; peers need to hear about it.
    Changed,
    /// Accepted but nothing changed; do not propagate.
    Unchanged,
}

/// Why a change was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("nick {} is held by {}", existing.nick, existing.uid)]
    NickInUse { existing: UserRecord },
    #[error("uid {0} already exists")]
    UidInUse(String),
    #[error("no such user {0}")]
    NoSuchUser(String),
    #[error("no such channel {0}")]
    NoSuchChannel(String),
}

/// Collaborator interface to users, channels and bans.
pub trait StateStore: Send + Sync {
    /// Apply one change atomically.
    fn apply(&self, change: StateChange) -> Result<Applied, Rejection>;

    fn user(&self, uid: &str) -> Option<UserRecord>;

    fn user_by_nick(&self, nick: &str) -> Option<UserRecord>;

    fn channel(&self, name: &str) -> Option<ChannelRecord>;

    /// Every user connected to one of `servers`.
    fn users_owned_by(&self, servers: &HashSet<ServerId>) -> Vec<UserRecord>;

    /// Number of users per server.
    fn user_counts(&self) -> HashMap<ServerId, usize>;

    /// Full state for a burst.
    fn snapshot(&self) -> StateSnapshot;
}
