//! Identifier collision rules.
//!
//! When two servers independently claim the same identifier (a nickname,
//! a channel name, a ban mask) the older claim wins. Equal timestamps fall
//! back to the configured [`TieBreak`]. Every rule here is symmetric: two
//! servers seeing the same pair of claims in opposite order reach the same
//! result.

use crate::config::TieBreak;
use crate::state::{BanRecord, ChannelRecord, STATUS_MODES};

/// One side of a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim<'a> {
    /// Unique identifier behind the claim, e.g. the UID holding a nick.
    pub id: &'a str,
    /// When the claim was made.
    pub ts: u64,
}

impl<'a> Claim<'a> {
    pub fn new(id: &'a str, ts: u64) -> Self {
        Self { id, ts }
    }
}

/// Outcome of a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The claim already held locally survives; the incoming one loses.
    KeepExisting,
    /// The incoming claim survives; the local one loses.
    TakeIncoming,
    /// Both lose.
    KillBoth,
}

/// Decide which of two claims on the same identifier survives.
pub fn resolve(existing: Claim<'_>, incoming: Claim<'_>, tie_break: TieBreak) -> Verdict {
    if existing.id == incoming.id {
        // Same identity seen twice: nothing to kill.
        return if incoming.ts < existing.ts {
            Verdict::TakeIncoming
        } else {
            Verdict::KeepExisting
        };
    }

    match existing.ts.cmp(&incoming.ts) {
        std::cmp::Ordering::Less => Verdict::KeepExisting,
        std::cmp::Ordering::Greater => Verdict::TakeIncoming,
        std::cmp::Ordering::Equal => match tie_break {
            TieBreak::LowerId if existing.id < incoming.id => Verdict::KeepExisting,
            TieBreak::LowerId => Verdict::TakeIncoming,
            TieBreak::HigherId if existing.id > incoming.id => Verdict::KeepExisting,
            TieBreak::HigherId => Verdict::TakeIncoming,
            TieBreak::KillBoth => Verdict::KillBoth,
        },
    }
}

/// How a channel burst was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMerge {
    /// Incoming channel was older: its modes and statuses replaced ours.
    IncomingWon,
    /// Same age: modes and statuses were combined.
    Merged,
    /// Incoming channel was newer: only its members were added, without status.
    ExistingWon,
}

/// Merge an incoming channel state into the local one.
pub fn merge_channel(existing: &mut ChannelRecord, incoming: ChannelRecord) -> ChannelMerge {
    match incoming.ts.cmp(&existing.ts) {
        std::cmp::Ordering::Less => {
            existing.ts = incoming.ts;
            existing.modes = incoming.modes;
            existing.mode_params = incoming.mode_params;
            existing.clear_status();
            for (uid, prefix) in incoming.members {
                existing.members.insert(uid, prefix);
            }
            ChannelMerge::IncomingWon
        }
        std::cmp::Ordering::Equal => {
            existing.modes.extend(incoming.modes);
            for (letter, param) in incoming.mode_params {
                let slot = existing.mode_params.entry(letter).or_default();
                if param > *slot {
                    *slot = param;
                }
            }
            for (uid, prefix) in incoming.members {
                let current = existing.members.entry(uid).or_default();
                let combined = format!("{}{}", current, prefix);
                // Highest status first, so both sides render the same string.
                *current = STATUS_MODES
                    .iter()
                    .map(|&(_, p)| p)
                    .filter(|p| combined.contains(*p))
                    .collect();
            }
            ChannelMerge::Merged
        }
        std::cmp::Ordering::Greater => {
            for uid in incoming.members.into_keys() {
                existing.members.entry(uid).or_default();
            }
            ChannelMerge::ExistingWon
        }
    }
}

/// Whether an incoming ban should replace the one held for the same mask.
pub fn ban_supersedes(existing: &BanRecord, incoming: &BanRecord) -> bool {
    (incoming.set_at, &incoming.setter) < (existing.set_at, &existing.setter)
}
