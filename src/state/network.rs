//! In-memory [`StateStore`].

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use slirc_proto::{irc_to_lower, ServerId};

use super::records::{BanKind, BanRecord, ChannelRecord, StateSnapshot, UserRecord};
use super::{Applied, Rejection, StateChange, StateStore};
use crate::sync::collision::{ban_supersedes, merge_channel};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    /// Folded nick to UID.
    nicks: HashMap<String, String>,
    /// Folded channel name to channel.
    channels: HashMap<String, ChannelRecord>,
    bans: BTreeMap<(BanKind, String), BanRecord>,
}

/// Users, channels and bans held under one lock so each change is atomic.
#[derive(Debug, Default)]
pub struct NetworkState {
    inner: RwLock<Inner>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&self, kind: BanKind, mask: &str) -> Option<BanRecord> {
        self.inner
            .read()
            .bans
            .get(&(kind, mask.to_string()))
            .cloned()
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().users.len()
    }
}

impl Inner {
    fn introduce(&mut self, user: UserRecord) -> Result<Applied, Rejection> {
        if self.users.contains_key(&user.uid) {
            return Err(Rejection::UidInUse(user.uid));
        }
        let folded = irc_to_lower(&user.nick);
        if let Some(holder) = self.nicks.get(&folded).and_then(|uid| self.users.get(uid)) {
            return Err(Rejection::NickInUse {
                existing: holder.clone(),
            });
        }
        self.nicks.insert(folded, user.uid.clone());
        self.users.insert(user.uid.clone(), user);
        Ok(Applied::Changed)
    }

    fn remove_user(&mut self, uid: &str) -> Result<Applied, Rejection> {
        let user = self
            .users
            .remove(uid)
            .ok_or_else(|| Rejection::NoSuchUser(uid.to_string()))?;
        self.nicks.remove(&irc_to_lower(&user.nick));
        self.channels.retain(|_, channel| {
            channel.members.remove(uid);
            !channel.members.is_empty()
        });
        Ok(Applied::Changed)
    }

    fn change_nick(&mut self, uid: &str, nick: String, ts: u64) -> Result<Applied, Rejection> {
        let folded = irc_to_lower(&nick);
        if let Some(holder) = self.nicks.get(&folded)
            && holder != uid
            && let Some(existing) = self.users.get(holder)
        {
            return Err(Rejection::NickInUse {
                existing: existing.clone(),
            });
        }

        let user = self
            .users
            .get_mut(uid)
            .ok_or_else(|| Rejection::NoSuchUser(uid.to_string()))?;
        if user.nick == nick && user.ts == ts {
            return Ok(Applied::Unchanged);
        }
        self.nicks.remove(&irc_to_lower(&user.nick));
        user.nick = nick;
        user.ts = ts;
        self.nicks.insert(folded, uid.to_string());
        Ok(Applied::Changed)
    }

    fn channel_mode(
        &mut self,
        channel: &str,
        ts: u64,
        modes: &str,
        args: &[String],
    ) -> Result<Applied, Rejection> {
        let record = self
            .channels
            .get_mut(&irc_to_lower(channel))
            .ok_or_else(|| Rejection::NoSuchChannel(channel.to_string()))?;
        if ts > record.ts || !record.apply_modes(modes, args) {
            return Ok(Applied::Unchanged);
        }
        Ok(Applied::Changed)
    }

    fn add_ban(&mut self, ban: BanRecord) -> Applied {
        let key = (ban.kind, ban.mask.clone());
        match self.bans.get(&key) {
            Some(existing) if !ban_supersedes(existing, &ban) => Applied::Unchanged,
            _ => {
                self.bans.insert(key, ban);
                Applied::Changed
            }
        }
    }
}

impl StateStore for NetworkState {
    fn apply(&self, change: StateChange) -> Result<Applied, Rejection> {
        let mut inner = self.inner.write();
        match change {
            StateChange::IntroduceUser(user) => inner.introduce(user),
            StateChange::RemoveUser { uid } => inner.remove_user(&uid),
            StateChange::ChangeNick { uid, nick, ts } => inner.change_nick(&uid, nick, ts),
            StateChange::SetUserModes { uid, modes } => {
                let user = inner
                    .users
                    .get_mut(&uid)
                    .ok_or(Rejection::NoSuchUser(uid))?;
                if user.modes == modes {
                    return Ok(Applied::Unchanged);
                }
                user.modes = modes;
                Ok(Applied::Changed)
            }
            StateChange::MergeChannel(incoming) => {
                let key = irc_to_lower(&incoming.name);
                match inner.channels.get_mut(&key) {
                    Some(existing) => {
                        let before = existing.clone();
                        merge_channel(existing, incoming);
                        if *existing == before {
                            Ok(Applied::Unchanged)
                        } else {
                            Ok(Applied::Changed)
                        }
                    }
                    None => {
                        inner.channels.insert(key, incoming);
                        Ok(Applied::Changed)
                    }
                }
            }
            StateChange::ChannelMode {
                channel,
                ts,
                modes,
                args,
            } => inner.channel_mode(&channel, ts, &modes, &args),
            StateChange::Part { channel, uid } => {
                let key = irc_to_lower(&channel);
                let record = inner
                    .channels
                    .get_mut(&key)
                    .ok_or_else(|| Rejection::NoSuchChannel(channel.clone()))?;
                if record.members.remove(&uid).is_none() {
                    return Ok(Applied::Unchanged);
                }
                if record.members.is_empty() {
                    inner.channels.remove(&key);
                }
                Ok(Applied::Changed)
            }
            StateChange::AddBan(ban) => Ok(inner.add_ban(ban)),
            StateChange::RemoveBan { kind, mask } => {
                if inner.bans.remove(&(kind, mask)).is_some() {
                    Ok(Applied::Changed)
                } else {
                    Ok(Applied::Unchanged)
                }
            }
        }
    }

    fn user(&self, uid: &str) -> Option<UserRecord> {
        self.inner.read().users.get(uid).cloned()
    }

    fn user_by_nick(&self, nick: &str) -> Option<UserRecord> {
        let inner = self.inner.read();
        inner
            .nicks
            .get(&irc_to_lower(nick))
            .and_then(|uid| inner.users.get(uid))
            .cloned()
    }

    fn channel(&self, name: &str) -> Option<ChannelRecord> {
        self.inner.read().channels.get(&irc_to_lower(name)).cloned()
    }

    fn users_owned_by(&self, servers: &HashSet<ServerId>) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self
            .inner
            .read()
            .users
            .values()
            .filter(|u| u.server().is_some_and(|sid| servers.contains(&sid)))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.uid.cmp(&b.uid));
        users
    }

    fn user_counts(&self) -> HashMap<ServerId, usize> {
        let mut counts = HashMap::new();
        for user in self.inner.read().users.values() {
            if let Some(sid) = user.server() {
                *counts.entry(sid).or_insert(0) += 1;
            }
        }
        counts
    }

    fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        let mut users: Vec<UserRecord> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.uid.cmp(&b.uid));
        let mut channels: Vec<ChannelRecord> = inner.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        StateSnapshot {
            users,
            channels,
            bans: inner.bans.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(uid: &str, nick: &str, ts: u64) -> UserRecord {
        UserRecord {
            uid: uid.into(),
            nick: nick.into(),
            ts,
            user: "u".into(),
            host: "h".into(),
            modes: "+".into(),
            realname: "r".into(),
        }
    }

    #[test]
    fn nick_collision_reports_holder() {
        let state = NetworkState::new();
        state
            .apply(StateChange::IntroduceUser(user("00AAAAAAA", "Alice", 100)))
            .unwrap();

        let err = state
            .apply(StateChange::IntroduceUser(user("00BAAAAAA", "alice", 200)))
            .unwrap_err();
        match err {
            Rejection::NickInUse { existing } => assert_eq!(existing.uid, "00AAAAAAA"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn remove_user_drops_memberships() {
        let state = NetworkState::new();
        state
            .apply(StateChange::IntroduceUser(user("00AAAAAAA", "alice", 100)))
            .unwrap();
        let mut channel = ChannelRecord::new("#Rust", 10);
        channel.members.insert("00AAAAAAA".into(), "@".into());
        state.apply(StateChange::MergeChannel(channel)).unwrap();

        state
            .apply(StateChange::RemoveUser {
                uid: "00AAAAAAA".into(),
            })
            .unwrap();
        assert!(state.user_by_nick("alice").is_none());
        assert!(state.channel("#rust").is_none());
        assert_eq!(
            state.apply(StateChange::RemoveUser {
                uid: "00AAAAAAA".into()
            }),
            Err(Rejection::NoSuchUser("00AAAAAAA".into()))
        );
    }

    #[test]
    fn nick_change_moves_index() {
        let state = NetworkState::new();
        state
            .apply(StateChange::IntroduceUser(user("00AAAAAAA", "alice", 100)))
            .unwrap();
        state
            .apply(StateChange::ChangeNick {
                uid: "00AAAAAAA".into(),
                nick: "Alicia".into(),
                ts: 150,
            })
            .unwrap();
        assert!(state.user_by_nick("alice").is_none());
        assert_eq!(state.user_by_nick("alicia").unwrap().ts, 150);
    }

    #[test]
    fn stale_tmode_is_ignored() {
        let state = NetworkState::new();
        state
            .apply(StateChange::MergeChannel(ChannelRecord::new("#c", 100)))
            .unwrap();

        let stale = StateChange::ChannelMode {
            channel: "#c".into(),
            ts: 200,
            modes: "+m".into(),
            args: vec![],
        };
        assert_eq!(state.apply(stale), Ok(Applied::Unchanged));

        let fresh = StateChange::ChannelMode {
            channel: "#c".into(),
            ts: 100,
            modes: "+m".into(),
            args: vec![],
        };
        assert_eq!(state.apply(fresh), Ok(Applied::Changed));
        assert!(state.channel("#c").unwrap().modes.contains(&'m'));
    }

    #[test]
    fn older_ban_is_kept() {
        let state = NetworkState::new();
        let ban = |set_at| BanRecord {
            kind: BanKind::Gline,
            mask: "*@bad".into(),
            setter: "oper".into(),
            set_at,
            duration: 0,
            reason: "r".into(),
        };
        assert_eq!(state.apply(StateChange::AddBan(ban(100))), Ok(Applied::Changed));
        assert_eq!(state.apply(StateChange::AddBan(ban(200))), Ok(Applied::Unchanged));
        assert_eq!(state.apply(StateChange::AddBan(ban(100))), Ok(Applied::Unchanged));
        assert_eq!(state.ban(BanKind::Gline, "*@bad").unwrap().set_at, 100);
    }

    #[test]
    fn snapshot_is_sorted() {
        let state = NetworkState::new();
        for (uid, nick) in [("00BAAAAAA", "b"), ("00AAAAAAA", "a")] {
            state
                .apply(StateChange::IntroduceUser(user(uid, nick, 1)))
                .unwrap();
        }
        let snapshot = state.snapshot();
        let uids: Vec<_> = snapshot.users.iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(uids, vec!["00AAAAAAA", "00BAAAAAA"]);
        assert_eq!(state.user_counts()[&ServerId::new("00A")], 1);
    }
}
