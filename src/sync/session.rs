//! Link session state machine.
//!
//! Drives one physical server link from transport connect to close:
//! capability exchange, mutual SERVER introduction, burst exchange,
//! steady state and liveness. The machine does no I/O. Each input is fed
//! through one dispatch method and answered with [`Action`]s for the link
//! task to carry out, so illegal sequences (a steady-state command before
//! the burst is done, a second CAPAB) are rejected in one place.

use std::collections::BTreeSet;

use slirc_proto::{
    irc_eq, is_valid_sid, Command, Message, ServerId, MANDATORY_CAPABS, PROTOCOL_VERSION,
    SUPPORTED_CAPABS,
};
use subtle::ConstantTimeEq;
use tokio::time::{Duration, Instant};

use crate::config::LinkBlock;
use crate::error::LinkError;

/// Which side opened the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Observable protocol state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Connecting,
    AwaitingCapability,
    AwaitingServerIntroduction,
    Bursting,
    Established,
    Closing,
    Closed,
}

impl LinkPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingCapability => "awaiting_capability",
            Self::AwaitingServerIntroduction => "awaiting_server",
            Self::Bursting => "bursting",
            Self::Established => "established",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// The local server as presented in handshakes.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
}

/// An authenticated peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
    /// Capabilities both sides support.
    pub capabilities: BTreeSet<String>,
}

/// What the link task must do in response to an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a line to the peer.
    Send(Message),
    /// The peer authenticated: attach it to the topology, then stream the
    /// local burst and report [`LinkSession::on_burst_sent`].
    BeginBurst(PeerIdentity),
    /// A burst record or steady-state command for the protocol layer.
    Apply(Message),
    /// Both bursts are complete.
    Established,
}

#[derive(Debug)]
enum State {
    Connecting,
    AwaitingCapability,
    AwaitingServerIntroduction {
        capabilities: BTreeSet<String>,
    },
    Bursting {
        peer: PeerIdentity,
        sent: bool,
        received: bool,
        /// Steady-state traffic that arrived after the peer's end of burst
        /// but before ours was written.
        deferred: Vec<Message>,
    },
    Established {
        peer: PeerIdentity,
    },
    Closing,
    Closed,
}

/// Keepalive bookkeeping.
#[derive(Debug)]
struct Liveness {
    last_activity: Instant,
    ping_outstanding: bool,
}

/// Protocol state for one link.
#[derive(Debug)]
pub struct LinkSession {
    direction: Direction,
    local: LocalIdentity,
    links: Vec<LinkBlock>,
    /// For outbound links, the block that was dialed.
    dialed: Option<LinkBlock>,
    state: State,
    liveness: Liveness,
}

impl LinkSession {
    /// A session for a connection we accepted.
    pub fn inbound(local: LocalIdentity, links: Vec<LinkBlock>, now: Instant) -> Self {
        Self::new(Direction::Inbound, local, links, None, now)
    }

    /// A session for a connection we dialed to `link`.
    pub fn outbound(
        local: LocalIdentity,
        links: Vec<LinkBlock>,
        link: LinkBlock,
        now: Instant,
    ) -> Self {
        Self::new(Direction::Outbound, local, links, Some(link), now)
    }

    fn new(
        direction: Direction,
        local: LocalIdentity,
        links: Vec<LinkBlock>,
        dialed: Option<LinkBlock>,
        now: Instant,
    ) -> Self {
        Self {
            direction,
            local,
            links,
            dialed,
            state: State::Connecting,
            liveness: Liveness {
                last_activity: now,
                ping_outstanding: false,
            },
        }
    }

    pub fn phase(&self) -> LinkPhase {
        match self.state {
            State::Connecting => LinkPhase::Connecting,
            State::AwaitingCapability => LinkPhase::AwaitingCapability,
            State::AwaitingServerIntroduction { .. } => LinkPhase::AwaitingServerIntroduction,
            State::Bursting { .. } => LinkPhase::Bursting,
            State::Established { .. } => LinkPhase::Established,
            State::Closing => LinkPhase::Closing,
            State::Closed => LinkPhase::Closed,
        }
    }

    /// The authenticated peer, once past the introduction.
    pub fn peer(&self) -> Option<&PeerIdentity> {
        match &self.state {
            State::Bursting { peer, .. } | State::Established { peer } => Some(peer),
            _ => None,
        }
    }

    /// Transport connected or accepted.
    pub fn on_connected(&mut self) -> Result<Vec<Action>, LinkError> {
        match self.state {
            State::Connecting => {
                self.state = State::AwaitingCapability;
                let caps = SUPPORTED_CAPABS.iter().map(|c| c.to_string()).collect();
                Ok(vec![Action::Send(Message::new(Command::CAPAB(
                    PROTOCOL_VERSION,
                    caps,
                )))])
            }
            _ => Err(LinkError::ProtocolViolation(
                "transport connected twice".to_string(),
            )),
        }
    }

    /// A parsed line from the peer.
    pub fn on_message(&mut self, msg: Message, now: Instant) -> Result<Vec<Action>, LinkError> {
        self.liveness.last_activity = now;
        self.liveness.ping_outstanding = false;

        if let Command::ERROR(reason) = &msg.command {
            return match self.state {
                State::Closing | State::Closed => Ok(Vec::new()),
                _ => Err(LinkError::Closed(format!("peer sent ERROR: {}", reason))),
            };
        }

        match std::mem::replace(&mut self.state, State::Closing) {
            State::Connecting => {
                self.state = State::Connecting;
                Err(LinkError::ProtocolViolation(
                    "data before transport connected".to_string(),
                ))
            }
            State::AwaitingCapability => self.on_capability(msg),
            State::AwaitingServerIntroduction { capabilities } => {
                self.on_introduction(msg, capabilities)
            }
            State::Bursting {
                peer,
                sent,
                received,
                deferred,
            } => self.on_burst_message(msg, peer, sent, received, deferred),
            State::Established { peer } => {
                let actions = self.on_steady_message(msg);
                self.state = State::Established { peer };
                actions
            }
            State::Closing => Ok(Vec::new()),
            State::Closed => {
                self.state = State::Closed;
                Ok(Vec::new())
            }
        }
    }

    fn on_capability(&mut self, msg: Message) -> Result<Vec<Action>, LinkError> {
        let Command::CAPAB(version, caps) = msg.command else {
            return Err(LinkError::ProtocolViolation(format!(
                "expected CAPAB, got {}",
                msg.command.name()
            )));
        };
        let capabilities = negotiate(version, &caps)?;

        let mut actions = Vec::new();
        if let Some(link) = &self.dialed {
            actions.push(Action::Send(self.introduction(&link.password)));
        }
        self.state = State::AwaitingServerIntroduction { capabilities };
        Ok(actions)
    }

    fn on_introduction(
        &mut self,
        msg: Message,
        capabilities: BTreeSet<String>,
    ) -> Result<Vec<Action>, LinkError> {
        let Command::SERVER {
            name,
            password,
            sid,
            description,
            ..
        } = msg.command
        else {
            return Err(LinkError::ProtocolViolation(format!(
                "expected SERVER, got {}",
                msg.command.name()
            )));
        };
        if msg.source.is_some() {
            return Err(LinkError::ProtocolViolation(
                "remote introduction before authentication".to_string(),
            ));
        }

        let link = self.verify_peer(&name, &password, &sid)?.clone();
        let peer = PeerIdentity {
            sid: ServerId::new(sid),
            name,
            description,
            capabilities,
        };

        let mut actions = Vec::new();
        if self.direction == Direction::Inbound {
            actions.push(Action::Send(self.introduction(&link.password)));
        }
        actions.push(Action::BeginBurst(peer.clone()));
        self.state = State::Bursting {
            peer,
            sent: false,
            received: false,
            deferred: Vec::new(),
        };
        Ok(actions)
    }

    fn on_burst_message(
        &mut self,
        msg: Message,
        peer: PeerIdentity,
        sent: bool,
        mut received: bool,
        mut deferred: Vec<Message>,
    ) -> Result<Vec<Action>, LinkError> {
        let mut actions = Vec::new();

        match &msg.command {
            Command::BURST(_) if !received => {}
            Command::ENDBURST if !received => {
                received = true;
                if sent {
                    actions.push(Action::Established);
                    actions.extend(deferred.drain(..).map(Action::Apply));
                    self.state = State::Established { peer };
                    return Ok(actions);
                }
            }
            Command::CAPAB(..) | Command::BURST(_) | Command::ENDBURST => {
                return Err(LinkError::ProtocolViolation(format!(
                    "unexpected {} during burst",
                    msg.command.name()
                )));
            }
            Command::SERVER { .. } if msg.source.is_none() => {
                return Err(LinkError::ProtocolViolation(
                    "repeated SERVER introduction".to_string(),
                ));
            }
            Command::PING(..) | Command::PONG(..) => {
                actions.extend(self.keepalive_reply(&msg));
            }
            _ if received => deferred.push(msg),
            _ => actions.push(Action::Apply(msg)),
        }

        self.state = State::Bursting {
            peer,
            sent,
            received,
            deferred,
        };
        Ok(actions)
    }

    fn on_steady_message(&self, msg: Message) -> Result<Vec<Action>, LinkError> {
        match &msg.command {
            Command::CAPAB(..) | Command::BURST(_) | Command::ENDBURST => Err(
                LinkError::ProtocolViolation(format!("unexpected {} after burst", msg.command.name())),
            ),
            Command::SERVER { .. } if msg.source.is_none() => Err(LinkError::ProtocolViolation(
                "repeated SERVER introduction".to_string(),
            )),
            Command::PING(..) | Command::PONG(..) => Ok(self.keepalive_reply(&msg)),
            _ => Ok(vec![Action::Apply(msg)]),
        }
    }

    /// Answer keepalives addressed to us; anything else is routed.
    fn keepalive_reply(&self, msg: &Message) -> Vec<Action> {
        let local = self.local.sid.as_str();
        match &msg.command {
            Command::PING(source, target) if target.as_deref().is_none_or(|t| t == local) => {
                let reply = Command::PONG(local.to_string(), Some(source.clone()));
                vec![Action::Send(Message::from_source(local, reply))]
            }
            Command::PONG(_, target) if target.as_deref().is_none_or(|t| t == local) => Vec::new(),
            _ => vec![Action::Apply(msg.clone())],
        }
    }

    /// The local burst has been fully written.
    pub fn on_burst_sent(&mut self) -> Vec<Action> {
        let State::Bursting {
            peer,
            received,
            deferred,
            ..
        } = std::mem::replace(&mut self.state, State::Closing)
        else {
            return Vec::new();
        };

        if received {
            let mut actions = vec![Action::Established];
            actions.extend(deferred.into_iter().map(Action::Apply));
            self.state = State::Established { peer };
            actions
        } else {
            self.state = State::Bursting {
                peer,
                sent: true,
                received,
                deferred,
            };
            Vec::new()
        }
    }

    /// Periodic liveness check. Only established links are probed; earlier
    /// phases are bounded by the handshake and burst deadlines.
    pub fn on_tick(
        &mut self,
        now: Instant,
        ping_interval: Duration,
        ping_timeout: Duration,
    ) -> Result<Vec<Action>, LinkError> {
        let State::Established { peer } = &self.state else {
            return Ok(Vec::new());
        };

        let idle = now.saturating_duration_since(self.liveness.last_activity);
        if idle >= ping_timeout {
            return Err(LinkError::PingTimeout);
        }
        if idle >= ping_interval && !self.liveness.ping_outstanding {
            self.liveness.ping_outstanding = true;
            let ping = Command::PING(
                self.local.sid.to_string(),
                Some(peer.sid.to_string()),
            );
            return Ok(vec![Action::Send(Message::from_source(
                self.local.sid.as_str(),
                ping,
            ))]);
        }
        Ok(Vec::new())
    }

    /// Abandon the link from any state.
    ///
    /// Yields the `ERROR` notice for the peer unless the session is already
    /// closing.
    pub fn force_close(&mut self, err: &LinkError) -> Vec<Action> {
        match self.state {
            State::Closing | State::Closed => Vec::new(),
            _ => {
                self.state = State::Closing;
                vec![Action::Send(Message::new(Command::ERROR(err.peer_notice())))]
            }
        }
    }

    /// Transport released.
    pub fn finish(&mut self) {
        self.state = State::Closed;
    }

    fn introduction(&self, password: &str) -> Message {
        Message::new(Command::SERVER {
            name: self.local.name.clone(),
            password: password.to_string(),
            hopcount: 0,
            sid: self.local.sid.to_string(),
            description: self.local.description.clone(),
        })
    }

    fn verify_peer(&self, name: &str, password: &str, sid: &str) -> Result<&LinkBlock, LinkError> {
        if !is_valid_sid(sid) {
            return Err(LinkError::ProtocolViolation(format!("malformed sid {}", sid)));
        }
        if sid == self.local.sid.as_str() || irc_eq(name, &self.local.name) {
            return Err(LinkError::DuplicateServer(format!("{} ({})", name, sid)));
        }

        let link = match &self.dialed {
            Some(link) if irc_eq(&link.name, name) => link,
            Some(link) => {
                return Err(LinkError::AuthenticationFailed(format!(
                    "dialed {} but peer is {}",
                    link.name, name
                )));
            }
            None => self
                .links
                .iter()
                .find(|l| irc_eq(&l.name, name))
                .ok_or_else(|| {
                    LinkError::AuthenticationFailed(format!("no link block for {}", name))
                })?,
        };

        if !bool::from(link.password.as_bytes().ct_eq(password.as_bytes())) {
            return Err(LinkError::AuthenticationFailed(format!(
                "bad password from {}",
                name
            )));
        }
        if let Some(expected) = &link.sid
            && expected != sid
        {
            return Err(LinkError::AuthenticationFailed(format!(
                "{} presented sid {}, expected {}",
                name, sid, expected
            )));
        }
        Ok(link)
    }
}

/// Check a peer's CAPAB and return the shared capability set.
pub fn negotiate(version: u32, offered: &[String]) -> Result<BTreeSet<String>, LinkError> {
    if version != PROTOCOL_VERSION {
        return Err(LinkError::IncompatibleProtocol(format!(
            "protocol version {} (we speak {})",
            version, PROTOCOL_VERSION
        )));
    }

    let offered: BTreeSet<String> = offered.iter().map(|c| c.to_ascii_uppercase()).collect();
    let missing: Vec<&str> = MANDATORY_CAPABS
        .iter()
        .copied()
        .filter(|cap| !offered.contains(*cap))
        .collect();
    if !missing.is_empty() {
        return Err(LinkError::IncompatibleProtocol(format!(
            "missing capabilities: {}",
            missing.join(" ")
        )));
    }

    Ok(SUPPORTED_CAPABS
        .iter()
        .filter(|cap| offered.contains(**cap))
        .map(|cap| cap.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(sid: &str, name: &str) -> LocalIdentity {
        LocalIdentity {
            sid: ServerId::new(sid),
            name: name.to_string(),
            description: "test".to_string(),
        }
    }

    fn link(name: &str, password: &str, sid: Option<&str>) -> LinkBlock {
        LinkBlock {
            name: name.to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 7000,
            password: password.to_string(),
            autoconnect: false,
            sid: sid.map(str::to_string),
        }
    }

    fn capab() -> Message {
        Message::new(Command::CAPAB(
            PROTOCOL_VERSION,
            SUPPORTED_CAPABS.iter().map(|c| c.to_string()).collect(),
        ))
    }

    fn server(name: &str, password: &str, sid: &str) -> Message {
        Message::new(Command::SERVER {
            name: name.to_string(),
            password: password.to_string(),
            hopcount: 0,
            sid: sid.to_string(),
            description: "peer".to_string(),
        })
    }

    fn sent(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(m) => Some(m.command.name().to_string()),
                _ => None,
            })
            .collect()
    }

    /// Inbound hub 00A accepting leaf 00B, already at Bursting.
    fn bursting_inbound(now: Instant) -> LinkSession {
        let mut s = LinkSession::inbound(
            local("00A", "hub.net"),
            vec![link("leaf.net", "pw", None)],
            now,
        );
        s.on_connected().unwrap();
        s.on_message(capab(), now).unwrap();
        s.on_message(server("leaf.net", "pw", "00B"), now).unwrap();
        assert_eq!(s.phase(), LinkPhase::Bursting);
        s
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    #[test]
    fn outbound_handshake_flow() {
        let now = Instant::now();
        let block = link("leaf.net", "pw", Some("00B"));
        let mut s = LinkSession::outbound(local("00A", "hub.net"), vec![block.clone()], block, now);
        assert_eq!(s.phase(), LinkPhase::Connecting);

        assert_eq!(sent(&s.on_connected().unwrap()), vec!["CAPAB"]);
        assert_eq!(s.phase(), LinkPhase::AwaitingCapability);

        // Outbound side introduces itself once capabilities check out.
        assert_eq!(sent(&s.on_message(capab(), now).unwrap()), vec!["SERVER"]);
        assert_eq!(s.phase(), LinkPhase::AwaitingServerIntroduction);

        let actions = s.on_message(server("leaf.net", "pw", "00B"), now).unwrap();
        assert!(sent(&actions).is_empty());
        match &actions[..] {
            [Action::BeginBurst(peer)] => {
                assert_eq!(peer.sid, ServerId::new("00B"));
                assert!(peer.capabilities.contains("ENDBURST"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.phase(), LinkPhase::Bursting);
    }

    #[test]
    fn inbound_replies_only_after_verifying() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(
            local("00A", "hub.net"),
            vec![link("leaf.net", "pw", None)],
            now,
        );
        s.on_connected().unwrap();
        assert!(s.on_message(capab(), now).unwrap().is_empty());

        let actions = s.on_message(server("leaf.net", "pw", "00B"), now).unwrap();
        assert_eq!(sent(&actions), vec!["SERVER"]);
        assert!(matches!(actions.last(), Some(Action::BeginBurst(_))));
    }

    #[test]
    fn wrong_password_fails_authentication() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(
            local("00A", "hub.net"),
            vec![link("leaf.net", "pw", None)],
            now,
        );
        s.on_connected().unwrap();
        s.on_message(capab(), now).unwrap();
        let err = s
            .on_message(server("leaf.net", "guess", "00B"), now)
            .unwrap_err();
        assert!(matches!(err, LinkError::AuthenticationFailed(_)));
    }

    #[test]
    fn unknown_server_fails_authentication() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(local("00A", "hub.net"), vec![], now);
        s.on_connected().unwrap();
        s.on_message(capab(), now).unwrap();
        let err = s.on_message(server("rogue.net", "pw", "00R"), now).unwrap_err();
        assert!(matches!(err, LinkError::AuthenticationFailed(_)));
    }

    #[test]
    fn pinned_sid_mismatch_fails_authentication() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(
            local("00A", "hub.net"),
            vec![link("leaf.net", "pw", Some("00B"))],
            now,
        );
        s.on_connected().unwrap();
        s.on_message(capab(), now).unwrap();
        let err = s.on_message(server("leaf.net", "pw", "00C"), now).unwrap_err();
        assert!(matches!(err, LinkError::AuthenticationFailed(_)));
    }

    #[test]
    fn own_sid_is_duplicate() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(
            local("00A", "hub.net"),
            vec![link("leaf.net", "pw", None)],
            now,
        );
        s.on_connected().unwrap();
        s.on_message(capab(), now).unwrap();
        let err = s.on_message(server("leaf.net", "pw", "00A"), now).unwrap_err();
        assert!(matches!(err, LinkError::DuplicateServer(_)));
    }

    #[test]
    fn command_before_capab_is_violation() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(local("00A", "hub.net"), vec![], now);
        s.on_connected().unwrap();
        let err = s
            .on_message(server("leaf.net", "pw", "00B"), now)
            .unwrap_err();
        assert!(matches!(err, LinkError::ProtocolViolation(_)));
    }

    #[test]
    fn peer_error_closes() {
        let now = Instant::now();
        let mut s = LinkSession::inbound(local("00A", "hub.net"), vec![], now);
        s.on_connected().unwrap();
        let err = s
            .on_message(Message::new(Command::ERROR("bye".into())), now)
            .unwrap_err();
        assert!(matches!(err, LinkError::Closed(_)));
    }

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    #[test]
    fn version_mismatch_is_incompatible() {
        let err = negotiate(1100, &["BURST".to_string()]).unwrap_err();
        assert!(matches!(err, LinkError::IncompatibleProtocol(_)));
    }

    #[test]
    fn missing_mandatory_capability_is_incompatible() {
        let offered = vec!["BURST".to_string(), "ENDBURST".to_string()];
        let err = negotiate(PROTOCOL_VERSION, &offered).unwrap_err();
        assert!(err.to_string().contains("SJOIN"));
    }

    #[test]
    fn negotiated_set_is_intersection() {
        let offered: Vec<String> = ["burst", "endburst", "sjoin", "addline", "FANCY"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let caps = negotiate(PROTOCOL_VERSION, &offered).unwrap();
        assert!(caps.contains("SJOIN"));
        assert!(!caps.contains("FANCY"));
        assert!(!caps.contains("ENCAP"));
    }

    // ========================================================================
    // Burst
    // ========================================================================

    fn quit(uid: &str) -> Message {
        Message::from_source(uid, Command::QUIT(Some("bye".into())))
    }

    #[test]
    fn burst_records_are_applied() {
        let now = Instant::now();
        let mut s = bursting_inbound(now);
        assert!(s
            .on_message(Message::new(Command::BURST(Some(1))), now)
            .unwrap()
            .is_empty());
        let actions = s.on_message(quit("00BAAAAAA"), now).unwrap();
        assert_eq!(actions, vec![Action::Apply(quit("00BAAAAAA"))]);
    }

    #[test]
    fn established_after_both_ends_of_burst() {
        let now = Instant::now();
        let mut s = bursting_inbound(now);
        assert!(s
            .on_message(Message::new(Command::ENDBURST), now)
            .unwrap()
            .is_empty());
        assert_eq!(s.phase(), LinkPhase::Bursting);

        assert_eq!(s.on_burst_sent(), vec![Action::Established]);
        assert_eq!(s.phase(), LinkPhase::Established);
    }

    #[test]
    fn traffic_after_peer_endburst_waits_for_our_burst() {
        let now = Instant::now();
        let mut s = bursting_inbound(now);
        s.on_message(Message::new(Command::ENDBURST), now).unwrap();

        assert!(s.on_message(quit("00BAAAAAA"), now).unwrap().is_empty());
        assert!(s.on_message(quit("00BAAAAAB"), now).unwrap().is_empty());

        assert_eq!(
            s.on_burst_sent(),
            vec![
                Action::Established,
                Action::Apply(quit("00BAAAAAA")),
                Action::Apply(quit("00BAAAAAB")),
            ]
        );
    }

    #[test]
    fn our_burst_first_then_peer_endburst() {
        let now = Instant::now();
        let mut s = bursting_inbound(now);
        assert!(s.on_burst_sent().is_empty());
        assert_eq!(
            s.on_message(Message::new(Command::ENDBURST), now).unwrap(),
            vec![Action::Established]
        );
    }

    #[test]
    fn second_endburst_is_violation() {
        let now = Instant::now();
        let mut s = bursting_inbound(now);
        s.on_message(Message::new(Command::ENDBURST), now).unwrap();
        let err = s
            .on_message(Message::new(Command::ENDBURST), now)
            .unwrap_err();
        assert!(matches!(err, LinkError::ProtocolViolation(_)));
    }

    // ========================================================================
    // Steady state and liveness
    // ========================================================================

    fn established(now: Instant) -> LinkSession {
        let mut s = bursting_inbound(now);
        s.on_message(Message::new(Command::ENDBURST), now).unwrap();
        s.on_burst_sent();
        s
    }

    #[test]
    fn ping_addressed_to_us_is_answered() {
        let now = Instant::now();
        let mut s = established(now);
        let ping = Message::from_source("00B", Command::PING("00B".into(), Some("00A".into())));
        let actions = s.on_message(ping, now).unwrap();
        assert_eq!(
            actions,
            vec![Action::Send(Message::from_source(
                "00A",
                Command::PONG("00A".into(), Some("00B".into()))
            ))]
        );
    }

    #[test]
    fn ping_for_elsewhere_is_routed() {
        let now = Instant::now();
        let mut s = established(now);
        let ping = Message::from_source("00B", Command::PING("00B".into(), Some("00C".into())));
        assert_eq!(s.on_message(ping.clone(), now).unwrap(), vec![Action::Apply(ping)]);
    }

    #[test]
    fn capab_after_burst_is_violation() {
        let now = Instant::now();
        let mut s = established(now);
        assert!(matches!(
            s.on_message(capab(), now),
            Err(LinkError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn keepalive_then_timeout() {
        let start = Instant::now();
        let mut s = established(start);
        let interval = Duration::from_secs(60);
        let timeout = Duration::from_secs(120);

        assert!(s.on_tick(start + Duration::from_secs(30), interval, timeout).unwrap().is_empty());
        assert_eq!(
            sent(&s.on_tick(start + Duration::from_secs(60), interval, timeout).unwrap()),
            vec!["PING"]
        );
        // Only one probe per idle period.
        assert!(s.on_tick(start + Duration::from_secs(90), interval, timeout).unwrap().is_empty());
        assert!(matches!(
            s.on_tick(start + Duration::from_secs(120), interval, timeout),
            Err(LinkError::PingTimeout)
        ));
    }

    #[test]
    fn any_traffic_counts_as_liveness() {
        let start = Instant::now();
        let mut s = established(start);
        let interval = Duration::from_secs(60);
        let timeout = Duration::from_secs(120);

        s.on_tick(start + Duration::from_secs(60), interval, timeout).unwrap();
        s.on_message(quit("00BAAAAAA"), start + Duration::from_secs(100)).unwrap();
        assert!(s.on_tick(start + Duration::from_secs(150), interval, timeout).unwrap().is_empty());
    }

    #[test]
    fn handshake_phases_are_not_probed() {
        let start = Instant::now();
        let mut s = bursting_inbound(start);
        let later = start + Duration::from_secs(1000);
        assert!(s
            .on_tick(later, Duration::from_secs(1), Duration::from_secs(2))
            .unwrap()
            .is_empty());
    }

    // ========================================================================
    // Closing
    // ========================================================================

    #[test]
    fn force_close_from_any_state() {
        let now = Instant::now();
        let mut s = bursting_inbound(now);
        let actions = s.force_close(&LinkError::BurstTimeout);
        assert_eq!(sent(&actions), vec!["ERROR"]);
        assert_eq!(s.phase(), LinkPhase::Closing);

        // Already closing: nothing more to say.
        assert!(s.force_close(&LinkError::PingTimeout).is_empty());
        assert!(s.on_message(quit("00BAAAAAA"), now).unwrap().is_empty());

        s.finish();
        assert_eq!(s.phase(), LinkPhase::Closed);
    }
}
