//! Steady-state command handling for an authenticated link.
//!
//! Every command a peer sends after authentication lands in [`handle`]: it
//! is checked against the tree (a peer may only speak for servers behind
//! it), applied to shared state, relayed onward and published as a
//! [`NetworkEvent`].

use slirc_proto::{irc_eq, is_valid_sid, is_valid_uid, mask_match, Command, Message, ServerId};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::state::{apply_mode_delta, Applied, BanKind, BanRecord, ChannelRecord, StateChange, UserRecord};
use crate::sync::burst;
use crate::sync::events::NetworkEvent;
use crate::sync::manager::SyncManager;
use crate::sync::split;
use crate::sync::topology::{NewServer, ServerState};

/// Apply one command received on the link to `from`.
///
/// An `Err` closes the link; commands that are merely stale or about
/// unknown entities are dropped with `Ok(())`.
pub fn handle(manager: &SyncManager, msg: Message, from: &ServerId) -> Result<(), LinkError> {
    crate::metrics::record_command(from.as_str(), msg.command.name());

    match &msg.command {
        Command::CAPAB(..) | Command::BURST(_) | Command::ENDBURST => {
            return Err(LinkError::ProtocolViolation(format!(
                "unexpected {} outside the handshake",
                msg.command.name()
            )));
        }
        Command::SERVER { .. } if msg.source.is_none() => {
            return Err(LinkError::ProtocolViolation(
                "repeated SERVER introduction".to_string(),
            ));
        }
        Command::ERROR(reason) => {
            return Err(LinkError::Closed(format!("peer sent ERROR: {}", reason)));
        }
        Command::Raw(name, _) => {
            return Err(LinkError::ProtocolViolation(format!("unknown command {}", name)));
        }
        _ => {}
    }

    // Lines the peer sends about itself may omit the source.
    let msg = match msg.source {
        Some(_) => msg,
        None => msg.with_source(from.as_str()),
    };
    if !origin_allowed(manager, &msg, from) {
        return Ok(());
    }

    match &msg.command {
        Command::SERVER {
            name,
            hopcount,
            sid,
            description,
            ..
        } => introduce_server(manager, &msg, from, name, *hopcount, sid, description),
        Command::SQUIT(target, reason) => squit(manager, from, target, reason),
        Command::UID {
            uid,
            ts,
            nick,
            user,
            host,
            modes,
            realname,
        } => {
            if ServerId::from_uid(uid).is_none_or(|owner| !manager.topology().is_behind(&owner, from)) {
                warn!(uid = %uid, from = %from, "UID for a server not behind the link");
                return Ok(());
            }
            let record = UserRecord {
                uid: uid.clone(),
                nick: nick.clone(),
                ts: *ts,
                user: user.clone(),
                host: host.clone(),
                modes: modes.clone(),
                realname: realname.clone(),
            };
            burst::introduce_user(manager, &msg, record, from)
        }
        Command::NICK(nick, ts) => {
            let uid = source_of(&msg);
            burst::change_nick(manager, &msg, uid, nick, *ts, from)
        }
        Command::MODE(target, delta) => {
            let Some(user) = manager.store().user(target) else {
                debug!(target = %target, "MODE for unknown user");
                return Ok(());
            };
            let modes = apply_mode_delta(&user.modes, delta);
            if let Ok(Applied::Changed) = manager.store().apply(StateChange::SetUserModes {
                uid: user.uid,
                modes,
            }) {
                manager.relay(&msg, Some(from));
            }
            Ok(())
        }
        Command::TMODE {
            ts,
            channel,
            modes,
            args,
        } => {
            let change = StateChange::ChannelMode {
                channel: channel.clone(),
                ts: *ts,
                modes: modes.clone(),
                args: args.clone(),
            };
            channel_changed(manager, &msg, from, channel, change);
            Ok(())
        }
        Command::PART(channel, _) => {
            let change = StateChange::Part {
                channel: channel.clone(),
                uid: source_of(&msg).to_string(),
            };
            channel_changed(manager, &msg, from, channel, change);
            Ok(())
        }
        Command::SJOIN {
            ts,
            channel,
            modes,
            args,
            members,
        } => {
            let record = ChannelRecord::from_sjoin(*ts, channel, modes, args, members);
            burst::merge_channel(manager, &msg, record, from)
        }
        Command::ADDLINE {
            kind,
            mask,
            setter,
            set_at,
            duration,
            reason,
        } => {
            let Some(kind) = BanKind::from_letter(kind) else {
                debug!(kind = %kind, "Unknown ban type");
                return Ok(());
            };
            let ban = BanRecord {
                kind,
                mask: mask.clone(),
                setter: setter.clone(),
                set_at: *set_at,
                duration: *duration,
                reason: reason.clone(),
            };
            burst::add_ban(manager, &msg, ban, from)
        }
        Command::DELLINE(kind, mask) => {
            let Some(kind) = BanKind::from_letter(kind) else {
                debug!(kind = %kind, "Unknown ban type");
                return Ok(());
            };
            let change = StateChange::RemoveBan {
                kind,
                mask: mask.clone(),
            };
            if let Ok(Applied::Changed) = manager.store().apply(change) {
                manager.relay(&msg, Some(from));
                manager.events().publish(NetworkEvent::BanRemoved {
                    kind,
                    mask: mask.clone(),
                });
            }
            Ok(())
        }
        Command::QUIT(reason) => {
            let uid = source_of(&msg);
            let Some(user) = remove_user(manager, uid) else {
                return Ok(());
            };
            manager.relay(&msg, Some(from));
            manager.events().publish(NetworkEvent::UserQuit {
                uid: user.uid,
                nick: user.nick,
                reason: reason.clone().unwrap_or_default(),
            });
            Ok(())
        }
        Command::KILL(target, reason) => {
            let uid = if is_valid_uid(target) {
                Some(target.clone())
            } else {
                manager.store().user_by_nick(target).map(|u| u.uid)
            };
            let Some(user) = uid.and_then(|uid| remove_user(manager, &uid)) else {
                return Ok(());
            };
            manager.relay(&msg, Some(from));
            manager.events().publish(NetworkEvent::UserKilled {
                uid: user.uid,
                nick: user.nick,
                killer: source_of(&msg).to_string(),
                reason: reason.clone(),
            });
            Ok(())
        }
        Command::PRIVMSG(target, text) | Command::NOTICE(target, text) => {
            manager.relay(&msg, Some(from));
            if is_local_recipient(manager, target) {
                manager.events().publish(NetworkEvent::MessageDelivered {
                    source: source_of(&msg).to_string(),
                    target: target.clone(),
                    text: text.clone(),
                    notice: matches!(msg.command, Command::NOTICE(..)),
                });
            }
            Ok(())
        }
        Command::ENCAP(target, subcommand, params) => {
            manager.relay(&msg, Some(from));
            let local = manager.local();
            let for_us = target == local.sid.as_str()
                || irc_eq(target, &local.name)
                || (target.contains(['*', '?']) && mask_match(target, &local.name));
            if for_us && !manager.run_remote(source_of(&msg), subcommand, params) {
                manager.events().publish(NetworkEvent::Encap {
                    source: source_of(&msg).to_string(),
                    subcommand: subcommand.clone(),
                    params: params.clone(),
                });
            }
            Ok(())
        }
        Command::PING(..) | Command::PONG(..) => {
            manager.relay(&msg, Some(from));
            Ok(())
        }
        other => Err(LinkError::ProtocolViolation(format!(
            "unexpected {}",
            other.name()
        ))),
    }
}

fn source_of(msg: &Message) -> &str {
    msg.source.as_deref().unwrap_or_default()
}

/// A peer may only originate commands for servers (and their users) that
/// lie behind it.
fn origin_allowed(manager: &SyncManager, msg: &Message, from: &ServerId) -> bool {
    let Some(origin) = msg.source_server() else {
        warn!(source = ?msg.source, command = msg.command.name(), "Malformed source");
        return false;
    };
    if !manager.topology().contains(&origin) {
        // Usually a straggler from a server that just split.
        debug!(origin = %origin, command = msg.command.name(), "Command from unknown server");
        return false;
    }
    if !manager.topology().is_behind(&origin, from) {
        warn!(
            origin = %origin,
            from = %from,
            command = msg.command.name(),
            "Command from a server not behind the link"
        );
        return false;
    }
    true
}

fn introduce_server(
    manager: &SyncManager,
    msg: &Message,
    from: &ServerId,
    name: &str,
    hopcount: u32,
    sid: &str,
    description: &str,
) -> Result<(), LinkError> {
    if !is_valid_sid(sid) {
        return Err(LinkError::ProtocolViolation(format!("invalid SID {}", sid)));
    }
    let parent = msg
        .source_server()
        .ok_or_else(|| LinkError::ProtocolViolation("SERVER without a parent".to_string()))?;

    let mut server = NewServer::new(ServerId::new(sid), name, description);
    if manager
        .topology()
        .get(from)
        .is_some_and(|n| n.state == ServerState::Bursting)
    {
        server = server.bursting();
    }
    let node = manager.topology().add_server(&parent, server)?;
    if node.hopcount != hopcount + 1 {
        debug!(sid = %node.sid, claimed = hopcount, actual = node.hopcount, "Hop count differs from tree depth");
    }

    manager.relay(msg, Some(from));
    manager.events().publish(NetworkEvent::ServerLinked {
        sid: node.sid,
        name: node.name,
        parent,
        hopcount: node.hopcount,
    });
    Ok(())
}

fn squit(manager: &SyncManager, from: &ServerId, target: &str, reason: &str) -> Result<(), LinkError> {
    let Ok(node) = manager.topology().lookup(target) else {
        debug!(target = %target, "SQUIT for unknown server");
        return Ok(());
    };
    if node.sid == *manager.local_sid() || node.sid == *from {
        return Err(LinkError::Closed(reason.to_string()));
    }
    if !manager.topology().is_behind(&node.sid, from) {
        warn!(target = %node.sid, from = %from, "SQUIT for a server not behind the link");
        return Ok(());
    }
    split::on_link_lost(manager, &node.sid, Some(from), reason);
    Ok(())
}

fn channel_changed(manager: &SyncManager, msg: &Message, from: &ServerId, channel: &str, change: StateChange) {
    match manager.store().apply(change) {
        Ok(Applied::Changed) => {
            manager.relay(msg, Some(from));
            manager.events().publish(NetworkEvent::ChannelUpdated {
                channel: channel.to_string(),
            });
        }
        Ok(Applied::Unchanged) => {}
        Err(err) => debug!(channel = %channel, error = %err, "Channel change rejected"),
    }
}

fn remove_user(manager: &SyncManager, uid: &str) -> Option<UserRecord> {
    let user = manager.store().user(uid)?;
    manager
        .store()
        .apply(StateChange::RemoveUser { uid: uid.to_string() })
        .ok()?;
    Some(user)
}

/// Whether a PRIVMSG or NOTICE target has recipients on this server.
fn is_local_recipient(manager: &SyncManager, target: &str) -> bool {
    if let Some(mask) = target.strip_prefix('$') {
        return mask_match(mask, &manager.local().name);
    }
    if target.starts_with(['#', '&']) {
        return manager.store().channel(target).is_some_and(|c| {
            c.members
                .keys()
                .any(|uid| ServerId::from_uid(uid).as_ref() == Some(manager.local_sid()))
        });
    }
    ServerId::from_uid(target).as_ref() == Some(manager.local_sid())
        && manager.store().user(target).is_some()
}
