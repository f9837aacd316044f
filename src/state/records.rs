//! Records for the entities the linking core carries between servers.

use std::collections::{BTreeMap, BTreeSet};

use slirc_proto::{Command, Member, ServerId};

/// A user as known network-wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Network-wide identifier; its first three characters are the owning SID.
    pub uid: String,
    /// Current nickname.
    pub nick: String,
    /// Timestamp of the current nick claim, used for collisions.
    pub ts: u64,
    pub user: String,
    pub host: String,
    /// User modes, `+` when none.
    pub modes: String,
    pub realname: String,
}

impl UserRecord {
    /// The server the user is connected to.
    pub fn server(&self) -> Option<ServerId> {
        ServerId::from_uid(&self.uid)
    }

    /// The `UID` introduction for this user.
    pub fn to_command(&self) -> Command {
        Command::UID {
            uid: self.uid.clone(),
            ts: self.ts,
            nick: self.nick.clone(),
            user: self.user.clone(),
            host: self.host.clone(),
            modes: self.modes.clone(),
            realname: self.realname.clone(),
        }
    }
}

/// Apply a user mode change such as `+iw-x` to a mode string like `+ix`.
pub fn apply_mode_delta(current: &str, delta: &str) -> String {
    let mut set: BTreeSet<char> = current.chars().filter(|c| *c != '+').collect();
    let mut adding = true;
    for letter in delta.chars() {
        match letter {
            '+' => adding = true,
            '-' => adding = false,
            _ if adding => {
                set.insert(letter);
            }
            _ => {
                set.remove(&letter);
            }
        }
    }
    std::iter::once('+').chain(set).collect()
}

/// Mode letters that grant a member status, with the prefix they show as.
pub const STATUS_MODES: &[(char, char)] = &[('o', '@'), ('h', '%'), ('v', '+')];

/// Mode letters that take a parameter when set.
pub const PARAM_MODES: &[char] = &['k', 'l'];

/// List modes. They carry a mask both ways and are not kept in the record.
pub const LIST_MODES: &[char] = &['b', 'e', 'I'];

/// Most mode arguments a single `TMODE` may carry.
pub const MAX_MODE_ARGS: usize = slirc_proto::MAX_PARAMS - 3;

/// Whether `letter` consumes an argument in the given direction.
pub fn takes_arg(letter: char, adding: bool) -> bool {
    STATUS_MODES.iter().any(|(m, _)| *m == letter)
        || LIST_MODES.contains(&letter)
        || letter == 'k'
        || (letter == 'l' && adding)
}

/// Split a mode change so no piece carries more than `max_args` arguments.
///
/// Every piece restates its direction. Letters whose argument is missing
/// are dropped, as are surplus arguments.
pub fn split_mode_change(modes: &str, args: &[String], max_args: usize) -> Vec<(String, Vec<String>)> {
    let max_args = max_args.max(1);
    let mut pieces = Vec::new();
    let mut current = (String::new(), Vec::new());
    let mut current_sign = None;
    let mut adding = true;
    let mut args = args.iter();

    for letter in modes.chars() {
        match letter {
            '+' => adding = true,
            '-' => adding = false,
            _ => {
                let arg = if takes_arg(letter, adding) {
                    match args.next() {
                        Some(arg) => Some(arg.clone()),
                        None => continue,
                    }
                } else {
                    None
                };
                if arg.is_some() && current.1.len() == max_args {
                    pieces.push(std::mem::take(&mut current));
                    current_sign = None;
                }
                if current_sign != Some(adding) {
                    current.0.push(if adding { '+' } else { '-' });
                    current_sign = Some(adding);
                }
                current.0.push(letter);
                current.1.extend(arg);
            }
        }
    }
    if !current.0.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// A channel: creation timestamp, simple modes and membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRecord {
    pub name: String,
    /// Creation timestamp; the oldest claim on a name wins.
    pub ts: u64,
    /// Mode letters without parameters.
    pub modes: BTreeSet<char>,
    /// Parameterised modes such as `k` and `l`.
    pub mode_params: BTreeMap<char, String>,
    /// UID to status prefixes.
    pub members: BTreeMap<String, String>,
}

impl ChannelRecord {
    pub fn new(name: impl Into<String>, ts: u64) -> Self {
        Self {
            name: name.into(),
            ts,
            ..Self::default()
        }
    }

    /// Build a record from an `SJOIN`.
    pub fn from_sjoin(ts: u64, channel: &str, modes: &str, args: &[String], members: &[Member]) -> Self {
        let mut record = Self::new(channel, ts);
        record.apply_modes(modes, args);
        for member in members {
            record.members.insert(member.uid.clone(), member.prefix.clone());
        }
        record
    }

    /// Render the mode string and its parameters.
    pub fn mode_string(&self) -> (String, Vec<String>) {
        let mut modes = String::from("+");
        let mut args = Vec::new();
        modes.extend(self.modes.iter());
        for (letter, param) in &self.mode_params {
            modes.push(*letter);
            args.push(param.clone());
        }
        (modes, args)
    }

    /// The `SJOIN` lines carrying this channel's full state.
    ///
    /// Members are spread over as many lines as needed to keep each one,
    /// source and CRLF included, within `max_len`. Only the first line
    /// carries the modes; the rest send a bare `+`. A channel with no
    /// members still gets one line.
    pub fn to_commands(&self, max_len: usize) -> Vec<Command> {
        let (modes, args) = self.mode_string();
        // ":<uid> SJOIN <ts> <channel> <modes> <args> :" plus CRLF, sized
        // for the longest source a relay could put in front
        let fixed = |modes: &str, args: &[String]| {
            1 + 9 + " SJOIN ".len()
                + self.ts.to_string().len()
                + 1
                + self.name.len()
                + 1
                + modes.len()
                + args.iter().map(|a| a.len() + 1).sum::<usize>()
                + " :".len()
                + 2
        };

        let mut chunks = Vec::new();
        let mut current: Vec<Member> = Vec::new();
        let mut used = fixed(&modes, &args);
        for (uid, prefix) in &self.members {
            let cost = prefix.len() + uid.len() + 1;
            if !current.is_empty() && used + cost > max_len {
                chunks.push(std::mem::take(&mut current));
                used = fixed("+", &[]);
            }
            current.push(Member::new(prefix.clone(), uid.clone()));
            used += cost;
        }
        chunks.push(current);

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, members)| {
                let (modes, args) = if i == 0 {
                    (modes.clone(), args.clone())
                } else {
                    ("+".to_string(), Vec::new())
                };
                Command::SJOIN {
                    ts: self.ts,
                    channel: self.name.clone(),
                    modes,
                    args,
                    members,
                }
            })
            .collect()
    }

    /// Apply a mode change such as `+ov-k uid uid key`.
    ///
    /// Returns whether anything changed.
    pub fn apply_modes(&mut self, modes: &str, args: &[String]) -> bool {
        let mut adding = true;
        let mut args = args.iter();
        let mut changed = false;

        for letter in modes.chars() {
            match letter {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    if let Some(&(_, prefix)) = STATUS_MODES.iter().find(|(m, _)| *m == letter) {
                        let Some(uid) = args.next() else { continue };
                        if let Some(current) = self.members.get_mut(uid.as_str()) {
                            let had = current.contains(prefix);
                            if adding && !had {
                                current.push(prefix);
                                changed = true;
                            } else if !adding && had {
                                current.retain(|c| c != prefix);
                                changed = true;
                            }
                        }
                    } else if LIST_MODES.contains(&letter) {
                        // list entries are not kept here; the change always relays
                        changed |= args.next().is_some();
                    } else if PARAM_MODES.contains(&letter) {
                        if adding {
                            let Some(param) = args.next() else { continue };
                            changed |= self.mode_params.insert(letter, param.clone()).as_deref()
                                != Some(param.as_str());
                        } else {
                            // -k carries the key, -l carries nothing
                            if letter == 'k' {
                                args.next();
                            }
                            changed |= self.mode_params.remove(&letter).is_some();
                        }
                    } else if adding {
                        changed |= self.modes.insert(letter);
                    } else {
                        changed |= self.modes.remove(&letter);
                    }
                }
            }
        }

        changed
    }

    /// Drop every status prefix.
    pub fn clear_status(&mut self) {
        for prefix in self.members.values_mut() {
            prefix.clear();
        }
    }
}

/// Kinds of network-wide bans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BanKind {
    /// G-line: user@host ban.
    Gline,
    /// Z-line: IP ban.
    Zline,
    /// Q-line: reserved nickname.
    Qline,
    /// R-line: realname ban.
    Rline,
    /// Shun: silent ignore.
    Shun,
}

impl BanKind {
    /// The wire token.
    pub fn letter(self) -> &'static str {
        match self {
            Self::Gline => "G",
            Self::Zline => "Z",
            Self::Qline => "Q",
            Self::Rline => "R",
            Self::Shun => "SHUN",
        }
    }

    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.to_ascii_uppercase().as_str() {
            "G" => Some(Self::Gline),
            "Z" => Some(Self::Zline),
            "Q" => Some(Self::Qline),
            "R" => Some(Self::Rline),
            "SHUN" => Some(Self::Shun),
            _ => None,
        }
    }
}

/// A network-wide ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub kind: BanKind,
    pub mask: String,
    pub setter: String,
    /// When the ban was set; the earliest claim on a (kind, mask) wins.
    pub set_at: u64,
    /// Seconds, 0 for permanent.
    pub duration: u64,
    pub reason: String,
}

impl BanRecord {
    pub fn to_command(&self) -> Command {
        Command::ADDLINE {
            kind: self.kind.letter().to_string(),
            mask: self.mask.clone(),
            setter: self.setter.clone(),
            set_at: self.set_at,
            duration: self.duration,
            reason: self.reason.clone(),
        }
    }
}

/// Everything a burst has to carry, in deterministic order.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub users: Vec<UserRecord>,
    pub channels: Vec<ChannelRecord>,
    pub bans: Vec<BanRecord>,
}
