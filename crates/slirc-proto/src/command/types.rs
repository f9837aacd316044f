//! Server-to-server command types.
//!
//! Every command a linked server may send is represented here with typed
//! parameters. Commands this crate does not know are kept as [`Command::Raw`]
//! so the caller can decide whether that is fatal.

/// A channel member as carried in `SJOIN`: status prefixes plus UID.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Member {
    /// Status prefixes such as `@` or `+`, possibly empty.
    pub prefix: String,
    /// The member's UID.
    pub uid: String,
}

impl Member {
    /// Create a member entry.
    pub fn new(prefix: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uid: uid.into(),
        }
    }

    /// Parse a `@+00AAAAAAB` style token.
    pub fn from_token(token: &str) -> Self {
        let split = token
            .find(|c: char| c.is_ascii_alphanumeric())
            .unwrap_or(token.len());
        Self::new(&token[..split], &token[split..])
    }
}

/// Server-to-server command with its parameters.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Command {
    // === Handshake ===
    /// `CAPAB version :caps...`
    CAPAB(u32, Vec<String>),
    /// `SERVER name password hopcount sid :description`
    SERVER {
        /// Dotted server name.
        name: String,
        /// Link password; `*` for remote introductions.
        password: String,
        /// Hop count as seen by the sender.
        hopcount: u32,
        /// Server identifier.
        sid: String,
        /// Free-form description.
        description: String,
    },
    /// `BURST [ts]` - start of burst.
    BURST(Option<u64>),
    /// `ENDBURST` - end of burst.
    ENDBURST,

    // === Users ===
    /// `UID uid ts nick user host modes :realname`
    UID {
        /// Network-wide user identifier.
        uid: String,
        /// Nick timestamp.
        ts: u64,
        /// Nickname.
        nick: String,
        /// Username.
        user: String,
        /// Visible host.
        host: String,
        /// User modes, `+` if none.
        modes: String,
        /// Real name.
        realname: String,
    },
    /// `NICK nick ts`, sourced from the UID.
    NICK(String, u64),
    /// `MODE target modes`, sourced from the UID.
    MODE(String, String),
    /// `QUIT [:reason]`, sourced from the UID.
    QUIT(Option<String>),
    /// `KILL target :reason`
    KILL(String, String),

    // === Channels ===
    /// `SJOIN ts channel modes [args...] :members`
    SJOIN {
        /// Channel creation timestamp.
        ts: u64,
        /// Channel name.
        channel: String,
        /// Simple modes, `+` if none.
        modes: String,
        /// Mode arguments.
        args: Vec<String>,
        /// Members with status prefixes.
        members: Vec<Member>,
    },
    /// `TMODE ts channel modes [args...]`
    TMODE {
        /// Channel timestamp the change was made against.
        ts: u64,
        /// Channel name.
        channel: String,
        /// Mode string.
        modes: String,
        /// Mode arguments.
        args: Vec<String>,
    },
    /// `PART channel [:reason]`, sourced from the UID.
    PART(String, Option<String>),

    // === Network bans ===
    /// `ADDLINE kind mask setter set_ts duration :reason`
    ADDLINE {
        /// Line type, e.g. `G`, `Z`, `Q`.
        kind: String,
        /// Mask the ban matches.
        mask: String,
        /// Who set it.
        setter: String,
        /// When it was set.
        set_at: u64,
        /// Duration in seconds, 0 for permanent.
        duration: u64,
        /// Reason.
        reason: String,
    },
    /// `DELLINE kind mask`
    DELLINE(String, String),

    // === Topology ===
    /// `SQUIT sid :reason`
    SQUIT(String, String),

    // === Messaging ===
    /// `PRIVMSG target :text`
    PRIVMSG(String, String),
    /// `NOTICE target :text`
    NOTICE(String, String),
    /// `ENCAP target subcommand [params...]`
    ENCAP(String, String, Vec<String>),

    // === Liveness ===
    /// `PING source [target]`
    PING(String, Option<String>),
    /// `PONG source [target]`
    PONG(String, Option<String>),
    /// `ERROR :reason`
    ERROR(String),

    /// Any command not listed above.
    Raw(String, Vec<String>),
}

impl Command {
    /// The command name as it appears on the wire.
    pub fn name(&self) -> &str {
        match self {
            Command::CAPAB(..) => "CAPAB",
            Command::SERVER { .. } => "SERVER",
            Command::BURST(_) => "BURST",
            Command::ENDBURST => "ENDBURST",
            Command::UID { .. } => "UID",
            Command::NICK(..) => "NICK",
            Command::MODE(..) => "MODE",
            Command::QUIT(_) => "QUIT",
            Command::KILL(..) => "KILL",
            Command::SJOIN { .. } => "SJOIN",
            Command::TMODE { .. } => "TMODE",
            Command::PART(..) => "PART",
            Command::ADDLINE { .. } => "ADDLINE",
            Command::DELLINE(..) => "DELLINE",
            Command::SQUIT(..) => "SQUIT",
            Command::PRIVMSG(..) => "PRIVMSG",
            Command::NOTICE(..) => "NOTICE",
            Command::ENCAP(..) => "ENCAP",
            Command::PING(..) => "PING",
            Command::PONG(..) => "PONG",
            Command::ERROR(_) => "ERROR",
            Command::Raw(name, _) => name,
        }
    }

    /// Whether this is a command type this crate does not model.
    pub fn is_raw(&self) -> bool {
        matches!(self, Command::Raw(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_from_token() {
        assert_eq!(Member::from_token("@+00AAAAAAB"), Member::new("@+", "00AAAAAAB"));
        assert_eq!(Member::from_token("00AAAAAAB"), Member::new("", "00AAAAAAB"));
    }

    #[test]
    fn test_names() {
        assert_eq!(Command::ENDBURST.name(), "ENDBURST");
        assert_eq!(
            Command::Raw("FJOIN".to_string(), vec![]).name(),
            "FJOIN"
        );
        assert!(Command::Raw("X".to_string(), vec![]).is_raw());
        assert!(!Command::ERROR("x".to_string()).is_raw());
    }
}
