//! Burst exchange.
//!
//! On a new link each side streams its full view of the network once:
//! servers (parents before children), users, channels, then bans, framed
//! by `BURST` and `ENDBURST`. Incoming records are applied one at a time
//! through the same collision rules used in steady state, so a record never
//! holds a lock longer than its own application.

use slirc_proto::line::MAX_LINE_LEN;
use slirc_proto::{Command, Message, ServerId};
use tracing::{debug, info};

use crate::error::LinkError;
use crate::state::{
    Applied, BanRecord, ChannelRecord, Rejection, StateChange, StateStore, UserRecord,
};
use crate::sync::collision::{resolve, Claim, Verdict};
use crate::sync::events::NetworkEvent;
use crate::sync::manager::SyncManager;
use crate::sync::topology::TopologyGraph;

/// Reason attached to collision kills.
pub const COLLISION_REASON: &str = "Nick collision";

/// Build the local burst for `peer`.
///
/// Nothing that lives behind `peer` is sent back to it.
pub fn generate(topology: &TopologyGraph, store: &dyn StateStore, peer: &ServerId) -> Vec<Message> {
    let local = topology.local().as_str();
    let behind_peer = |sid: &ServerId| topology.is_behind(sid, peer);
    let snapshot = store.snapshot();

    let mut lines = Vec::new();
    lines.push(Message::from_source(
        local,
        Command::BURST(Some(chrono::Utc::now().timestamp().max(0) as u64)),
    ));

    for node in topology.burst_order(peer) {
        let Some(parent) = node.parent else { continue };
        lines.push(Message::from_source(
            parent.as_str(),
            Command::SERVER {
                name: node.name,
                password: "*".to_string(),
                hopcount: node.hopcount,
                sid: node.sid.to_string(),
                description: node.description,
            },
        ));
    }

    for user in &snapshot.users {
        let Some(server) = user.server() else { continue };
        if behind_peer(&server) || !topology.contains(&server) {
            continue;
        }
        lines.push(Message::from_source(server.as_str(), user.to_command()));
    }

    for mut channel in snapshot.channels {
        channel.members.retain(|uid, _| {
            ServerId::from_uid(uid).is_some_and(|sid| !behind_peer(&sid))
        });
        if channel.members.is_empty() {
            continue;
        }
        lines.extend(
            channel
                .to_commands(MAX_LINE_LEN)
                .into_iter()
                .map(|command| Message::from_source(local, command)),
        );
    }

    for ban in &snapshot.bans {
        lines.push(Message::from_source(local, ban.to_command()));
    }

    lines.push(Message::from_source(local, Command::ENDBURST));
    lines
}

// ============================================================================
// Record application
// ============================================================================

/// Introduce a remote user, settling a nick collision if there is one.
pub fn introduce_user(
    manager: &SyncManager,
    msg: &Message,
    user: UserRecord,
    from: &ServerId,
) -> Result<(), LinkError> {
    match manager.store().apply(StateChange::IntroduceUser(user.clone())) {
        Ok(_) => {
            manager.relay(msg, Some(from));
            manager.events().publish(NetworkEvent::UserIntroduced(user));
            Ok(())
        }
        Err(Rejection::NickInUse { existing }) => {
            crate::metrics::record_collision("nick");
            let verdict = resolve(
                Claim::new(&existing.uid, existing.ts),
                Claim::new(&user.uid, user.ts),
                manager.tie_break(),
            );
            info!(
                nick = %user.nick,
                existing = %existing.uid,
                incoming = %user.uid,
                ?verdict,
                "Nick collision on introduction"
            );

            if matches!(verdict, Verdict::KeepExisting | Verdict::KillBoth) {
                // The loser was never stored here: only its own side needs the kill.
                manager.send_to(from, kill_message(manager, &user.uid));
            }
            if matches!(verdict, Verdict::TakeIncoming | Verdict::KillBoth) {
                kill_user(manager, &existing, None);
            }
            if verdict == Verdict::TakeIncoming {
                manager
                    .store()
                    .apply(StateChange::IntroduceUser(user.clone()))
                    .map_err(|e| LinkError::ProtocolViolation(e.to_string()))?;
                manager.relay(msg, Some(from));
                manager.events().publish(NetworkEvent::UserIntroduced(user));
            }
            Ok(())
        }
        Err(Rejection::UidInUse(uid)) => {
            debug!(uid = %uid, "Ignoring repeated introduction");
            Ok(())
        }
        Err(other) => {
            debug!(error = %other, "Introduction rejected");
            Ok(())
        }
    }
}

/// Apply a remote nick change, settling a collision if there is one.
pub fn change_nick(
    manager: &SyncManager,
    msg: &Message,
    uid: &str,
    nick: &str,
    ts: u64,
    from: &ServerId,
) -> Result<(), LinkError> {
    let Some(before) = manager.store().user(uid) else {
        debug!(uid = %uid, "Nick change for unknown user");
        return Ok(());
    };
    let change = || StateChange::ChangeNick {
        uid: uid.to_string(),
        nick: nick.to_string(),
        ts,
    };

    match manager.store().apply(change()) {
        Ok(Applied::Changed) => {
            manager.relay(msg, Some(from));
            manager.events().publish(NetworkEvent::NickChanged {
                uid: uid.to_string(),
                old: before.nick,
                new: nick.to_string(),
            });
            Ok(())
        }
        Ok(Applied::Unchanged) => Ok(()),
        Err(Rejection::NickInUse { existing }) => {
            crate::metrics::record_collision("nick");
            let verdict = resolve(
                Claim::new(&existing.uid, existing.ts),
                Claim::new(uid, ts),
                manager.tie_break(),
            );
            info!(nick = %nick, existing = %existing.uid, incoming = %uid, ?verdict, "Nick collision on change");

            if matches!(verdict, Verdict::KeepExisting | Verdict::KillBoth) {
                kill_user(manager, &before, None);
            }
            if matches!(verdict, Verdict::TakeIncoming | Verdict::KillBoth) {
                kill_user(manager, &existing, None);
            }
            if verdict == Verdict::TakeIncoming && manager.store().apply(change()).is_ok() {
                manager.relay(msg, Some(from));
                manager.events().publish(NetworkEvent::NickChanged {
                    uid: uid.to_string(),
                    old: before.nick,
                    new: nick.to_string(),
                });
            }
            Ok(())
        }
        Err(other) => {
            debug!(error = %other, "Nick change rejected");
            Ok(())
        }
    }
}

/// Merge a channel burst. Members that are not known here are dropped.
pub fn merge_channel(
    manager: &SyncManager,
    msg: &Message,
    mut channel: ChannelRecord,
    from: &ServerId,
) -> Result<(), LinkError> {
    channel
        .members
        .retain(|uid, _| manager.store().user(uid).is_some());
    if channel.members.is_empty() {
        debug!(channel = %channel.name, "SJOIN without known members");
        return Ok(());
    }

    let existing_ts = manager.store().channel(&channel.name).map(|c| c.ts);
    if existing_ts.is_some_and(|ts| ts != channel.ts) {
        crate::metrics::record_collision("channel");
    }

    let name = channel.name.clone();
    match manager.store().apply(StateChange::MergeChannel(channel)) {
        Ok(Applied::Changed) => {
            manager.relay(msg, Some(from));
            manager
                .events()
                .publish(NetworkEvent::ChannelUpdated { channel: name });
        }
        Ok(Applied::Unchanged) => {}
        Err(err) => debug!(channel = %name, error = %err, "Channel merge rejected"),
    }
    Ok(())
}

/// Add a network ban; an older ban on the same mask is kept.
pub fn add_ban(
    manager: &SyncManager,
    msg: &Message,
    ban: BanRecord,
    from: &ServerId,
) -> Result<(), LinkError> {
    if let Some(existing) = manager
        .store()
        .snapshot()
        .bans
        .iter()
        .find(|b| b.kind == ban.kind && b.mask == ban.mask)
        && *existing != ban
    {
        crate::metrics::record_collision("ban");
    }

    match manager.store().apply(StateChange::AddBan(ban.clone())) {
        Ok(Applied::Changed) => {
            manager.relay(msg, Some(from));
            manager.events().publish(NetworkEvent::BanAdded(ban));
        }
        Ok(Applied::Unchanged) => {}
        Err(err) => debug!(mask = %ban.mask, error = %err, "Ban rejected"),
    }
    Ok(())
}

fn kill_message(manager: &SyncManager, uid: &str) -> Message {
    Message::from_source(
        manager.local_sid().as_str(),
        Command::KILL(uid.to_string(), COLLISION_REASON.to_string()),
    )
}

/// Remove a user that lost a collision and tell every adjacent server,
/// except `except`.
fn kill_user(manager: &SyncManager, user: &UserRecord, except: Option<&ServerId>) {
    if manager
        .store()
        .apply(StateChange::RemoveUser {
            uid: user.uid.clone(),
        })
        .is_err()
    {
        return;
    }
    manager.relay(&kill_message(manager, &user.uid), except);
    manager.events().publish(NetworkEvent::UserKilled {
        uid: user.uid.clone(),
        nick: user.nick.clone(),
        killer: manager.local_sid().to_string(),
        reason: COLLISION_REASON.to_string(),
    });
}
