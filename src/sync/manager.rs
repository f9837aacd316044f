//! Coordinator for server links.
//!
//! [`SyncManager`] owns the link registry, the topology, the router and the
//! event bus. Link tasks report into it; collaborators submit local
//! mutations through [`SyncManager::publish_local`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use slirc_proto::{Command, Member, Message, ServerId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::{Config, TieBreak};
use crate::error::{CommandError, LinkError, RouteError};
use crate::state::{
    apply_mode_delta, split_mode_change, Applied, BanKind, BanRecord, ChannelRecord, Rejection,
    StateChange, StateStore, UidGenerator, UserRecord, MAX_MODE_ARGS,
};
use crate::sync::autoconnect::AutoconnectScheduler;
use crate::sync::events::{EventBus, NetworkEvent};
use crate::sync::link::LinkHandle;
use crate::sync::network::{self, Dialer, TcpDialer};
use crate::sync::router::Router;
use crate::sync::session::{LinkPhase, LocalIdentity, PeerIdentity};
use crate::sync::split::{self, SplitOutcome};
use crate::sync::topology::{LinkEntry, NewServer, ServerState, TopologyGraph};

/// A state change made on this server, to be announced to the network.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    UserIntroduced(UserRecord),
    NickChanged {
        uid: String,
        nick: String,
        ts: u64,
    },
    /// `modes` is a delta such as `+i-w`.
    UserModeChanged {
        uid: String,
        modes: String,
    },
    /// `ts` is used only if the channel does not exist yet.
    ChannelJoined {
        channel: String,
        uid: String,
        status: String,
        ts: u64,
    },
    ChannelParted {
        channel: String,
        uid: String,
        reason: Option<String>,
    },
    ChannelModeChanged {
        channel: String,
        modes: String,
        args: Vec<String>,
    },
    UserQuit {
        uid: String,
        reason: String,
    },
    UserKilled {
        uid: String,
        killer: String,
        reason: String,
    },
    BanAdded(BanRecord),
    BanRemoved {
        kind: BanKind,
        mask: String,
    },
    /// A notice to every user on servers matching `mask`.
    GlobalNotice {
        source: String,
        mask: String,
        text: String,
    },
    PrivateMessage {
        source: String,
        target: String,
        text: String,
        notice: bool,
    },
}

/// The wire form of a local event and the links it was queued on.
///
/// Most events fit one line; a long channel mode change is split.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    pub messages: Vec<Arc<Message>>,
    pub targets: Vec<ServerId>,
}

/// Manages server-to-server links and their shared state.
pub struct SyncManager {
    config: Config,
    local: LocalIdentity,
    topology: Arc<TopologyGraph>,
    router: Router,
    /// Directly attached peers.
    links: DashMap<ServerId, LinkHandle>,
    store: Arc<dyn StateStore>,
    events: EventBus,
    autoconnect: AutoconnectScheduler,
    dialer: Arc<dyn Dialer>,
    uids: UidGenerator,
    shutdown: CancellationToken,
    /// Back-reference for work that has to outlive a borrowed `&self`.
    this: Weak<SyncManager>,
}

/// `ENCAP` sub-command asking the target server to dial one of its links.
pub const RCONNECT: &str = "RCONNECT";

/// `ENCAP` sub-command asking the target server to drop one of its links.
pub const RSQUIT: &str = "RSQUIT";

impl SyncManager {
    /// A manager that dials peers over TCP.
    pub fn new(config: Config, store: Arc<dyn StateStore>) -> Arc<Self> {
        Self::with_dialer(config, store, Arc::new(TcpDialer))
    }

    pub fn with_dialer(
        config: Config,
        store: Arc<dyn StateStore>,
        dialer: Arc<dyn Dialer>,
    ) -> Arc<Self> {
        let local = LocalIdentity {
            sid: ServerId::new(config.server.sid.as_str()),
            name: config.server.name.clone(),
            description: config.server.description.clone(),
        };
        let topology = Arc::new(TopologyGraph::new(NewServer::new(
            local.sid.clone(),
            local.name.clone(),
            local.description.clone(),
        )));
        let autoconnect = AutoconnectScheduler::new(config.autoconnect.clone());

        Arc::new_cyclic(|this| Self {
            router: Router::new(Arc::clone(&topology)),
            topology,
            links: DashMap::new(),
            store,
            events: EventBus::default(),
            autoconnect,
            dialer,
            uids: UidGenerator::new(local.sid.clone()),
            local,
            shutdown: CancellationToken::new(),
            this: this.clone(),
            config,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn local_sid(&self) -> &ServerId {
        &self.local.sid
    }

    pub fn topology(&self) -> &Arc<TopologyGraph> {
        &self.topology
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn autoconnect(&self) -> &AutoconnectScheduler {
        &self.autoconnect
    }

    pub fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.dialer
    }

    pub fn tie_break(&self) -> TieBreak {
        self.config.collision.tie_break
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// A fresh UID for a user connecting to this server.
    pub fn next_uid(&self) -> String {
        self.uids.next()
    }

    pub fn link(&self, sid: &ServerId) -> Option<LinkHandle> {
        self.links.get(sid).map(|entry| entry.value().clone())
    }

    /// SIDs of directly attached peers.
    pub fn peers(&self) -> Vec<ServerId> {
        let mut peers: Vec<ServerId> = self.links.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    // ========================================================================
    // Relaying
    // ========================================================================

    /// Route `msg` and queue it on every selected link.
    ///
    /// Returns the links it was queued on. Unknown targets are dropped.
    pub fn relay(&self, msg: &Message, arrived_on: Option<&ServerId>) -> Vec<ServerId> {
        let class = self.router.classify(msg);
        crate::metrics::record_routed(class.label());
        let targets = match self.router.targets(class, arrived_on) {
            Ok(targets) => targets,
            Err(RouteError::UnknownTarget(target)) => {
                debug!(command = msg.command.name(), target = %target, "Dropping command for unknown target");
                crate::metrics::record_unknown_target();
                return Vec::new();
            }
        };
        if targets.is_empty() {
            return targets;
        }

        let shared = Arc::new(msg.clone());
        targets
            .into_iter()
            .filter(|sid| self.enqueue(sid, Arc::clone(&shared)))
            .collect()
    }

    /// Queue `msg` on one adjacent link.
    pub fn send_to(&self, sid: &ServerId, msg: Message) -> bool {
        self.enqueue(sid, Arc::new(msg))
    }

    fn enqueue(&self, sid: &ServerId, msg: Arc<Message>) -> bool {
        let Some(handle) = self.link(sid) else {
            debug!(sid = %sid, "No link registered for adjacent server");
            return false;
        };
        match handle.enqueue(msg) {
            Ok(()) => true,
            Err(err) => {
                // Only this link pays for a slow peer.
                warn!(sid = %sid, error = %err, "Failing link");
                handle.kill(err);
                false
            }
        }
    }

    // ========================================================================
    // Link lifecycle
    // ========================================================================

    /// Refuse a peer whose SID or name is already on the network.
    pub fn check_admission(&self, peer: &PeerIdentity) -> Result<(), LinkError> {
        if self.topology.contains(&peer.sid) {
            return Err(LinkError::DuplicateServer(peer.sid.to_string()));
        }
        if self.topology.lookup(&peer.name).is_ok() {
            return Err(LinkError::DuplicateServer(peer.name.clone()));
        }
        Ok(())
    }

    /// Attach an authenticated peer below the local server and register its
    /// link. The peer and its future subtree stay `Bursting` until
    /// [`link_established`](Self::link_established).
    pub fn attach_peer(&self, peer: &PeerIdentity, handle: LinkHandle) -> Result<(), LinkError> {
        let node = self.topology.add_server(
            &self.local.sid,
            NewServer::new(peer.sid.clone(), peer.name.clone(), peer.description.clone()).bursting(),
        )?;
        self.register_link(handle);

        let intro = Message::from_source(
            self.local.sid.as_str(),
            Command::SERVER {
                name: node.name.clone(),
                password: "*".to_string(),
                hopcount: node.hopcount,
                sid: node.sid.to_string(),
                description: node.description.clone(),
            },
        );
        self.relay(&intro, Some(&peer.sid));

        info!(sid = %peer.sid, peer = %peer.name, "Server linked");
        self.events.publish(NetworkEvent::ServerLinked {
            sid: node.sid,
            name: node.name,
            parent: self.local.sid.clone(),
            hopcount: node.hopcount,
        });
        Ok(())
    }

    /// Both bursts on the link to `sid` are complete.
    pub fn link_established(&self, sid: &ServerId) {
        self.topology.set_subtree_state(sid, ServerState::Live);
        let name = self.topology.get(sid).map(|n| n.name).unwrap_or_default();
        self.autoconnect.on_established(&name);
        info!(
            sid = %sid,
            peer = %name,
            servers = self.topology.server_count(),
            local_servers = self.topology.local_server_count(),
            "Link established"
        );
        self.events.publish(NetworkEvent::LinkStateChanged {
            peer: name,
            phase: LinkPhase::Established,
        });
    }

    /// The link to `sid` is gone: split its subtree off and unregister it.
    pub fn detach_link(&self, sid: &ServerId, reason: &str) -> SplitOutcome {
        split::on_link_lost(self, sid, None, reason)
    }

    pub(crate) fn register_link(&self, handle: LinkHandle) {
        self.links.insert(handle.sid.clone(), handle);
        crate::metrics::set_peers(self.links.len());
    }

    pub(crate) fn remove_link(&self, sid: &ServerId) -> Option<LinkHandle> {
        let removed = self.links.remove(sid).map(|(_, handle)| handle);
        crate::metrics::set_peers(self.links.len());
        removed
    }

    // ========================================================================
    // Local mutations
    // ========================================================================

    /// Apply a local change to shared state and queue its wire form.
    ///
    /// Returns `Ok(None)` when the change is a no-op or no adjacent link
    /// needs to hear about it.
    pub fn publish_local(&self, event: LocalEvent) -> Result<Option<Propagation>, Rejection> {
        let local = self.local.sid.as_str();

        let (applied, msgs): (Applied, Vec<Message>) = match event {
            LocalEvent::UserIntroduced(user) => {
                let msg = Message::from_source(local, user.to_command());
                (self.store.apply(StateChange::IntroduceUser(user))?, vec![msg])
            }
            LocalEvent::NickChanged { uid, nick, ts } => {
                let msg = Message::from_source(uid.as_str(), Command::NICK(nick.clone(), ts));
                (self.store.apply(StateChange::ChangeNick { uid, nick, ts })?, vec![msg])
            }
            LocalEvent::UserModeChanged { uid, modes } => {
                let user = self
                    .store
                    .user(&uid)
                    .ok_or_else(|| Rejection::NoSuchUser(uid.clone()))?;
                let msg = Message::from_source(uid.as_str(), Command::MODE(uid.clone(), modes.clone()));
                let modes = apply_mode_delta(&user.modes, &modes);
                (self.store.apply(StateChange::SetUserModes { uid, modes })?, vec![msg])
            }
            LocalEvent::ChannelJoined {
                channel,
                uid,
                status,
                ts,
            } => {
                let ts = self.store.channel(&channel).map_or(ts, |c| c.ts);
                let mut record = ChannelRecord::new(channel.as_str(), ts);
                record.members.insert(uid.clone(), status.clone());
                let msg = Message::from_source(
                    local,
                    Command::SJOIN {
                        ts,
                        channel,
                        modes: "+".to_string(),
                        args: Vec::new(),
                        members: vec![Member::new(status, uid)],
                    },
                );
                (self.store.apply(StateChange::MergeChannel(record))?, vec![msg])
            }
            LocalEvent::ChannelParted {
                channel,
                uid,
                reason,
            } => {
                let msg = Message::from_source(uid.as_str(), Command::PART(channel.clone(), reason));
                (self.store.apply(StateChange::Part { channel, uid })?, vec![msg])
            }
            LocalEvent::ChannelModeChanged {
                channel,
                modes,
                args,
            } => {
                let ts = self
                    .store
                    .channel(&channel)
                    .ok_or_else(|| Rejection::NoSuchChannel(channel.clone()))?
                    .ts;
                let msgs = split_mode_change(&modes, &args, MAX_MODE_ARGS)
                    .into_iter()
                    .map(|(modes, args)| {
                        Message::from_source(
                            local,
                            Command::TMODE {
                                ts,
                                channel: channel.clone(),
                                modes,
                                args,
                            },
                        )
                    })
                    .collect();
                let change = StateChange::ChannelMode {
                    channel,
                    ts,
                    modes,
                    args,
                };
                (self.store.apply(change)?, msgs)
            }
            LocalEvent::UserQuit { uid, reason } => {
                let msg = Message::from_source(uid.as_str(), Command::QUIT(Some(reason)));
                (self.store.apply(StateChange::RemoveUser { uid })?, vec![msg])
            }
            LocalEvent::UserKilled {
                uid,
                killer,
                reason,
            } => {
                let msg = Message::from_source(killer, Command::KILL(uid.clone(), reason));
                (self.store.apply(StateChange::RemoveUser { uid })?, vec![msg])
            }
            LocalEvent::BanAdded(ban) => {
                let msg = Message::from_source(local, ban.to_command());
                (self.store.apply(StateChange::AddBan(ban))?, vec![msg])
            }
            LocalEvent::BanRemoved { kind, mask } => {
                let msg = Message::from_source(
                    local,
                    Command::DELLINE(kind.letter().to_string(), mask.clone()),
                );
                (self.store.apply(StateChange::RemoveBan { kind, mask })?, vec![msg])
            }
            LocalEvent::GlobalNotice { source, mask, text } => {
                let target = format!("${}", mask);
                (
                    Applied::Changed,
                    vec![Message::from_source(source, Command::NOTICE(target, text))],
                )
            }
            LocalEvent::PrivateMessage {
                source,
                target,
                text,
                notice,
            } => {
                let command = if notice {
                    Command::NOTICE(target, text)
                } else {
                    Command::PRIVMSG(target, text)
                };
                (Applied::Changed, vec![Message::from_source(source, command)])
            }
        };

        if applied == Applied::Unchanged {
            return Ok(None);
        }
        // every piece takes the same route; a link killed part way
        // through is left out
        let mut targets: Option<Vec<ServerId>> = None;
        for msg in &msgs {
            let queued = self.relay(msg, None);
            targets = Some(match targets {
                None => queued,
                Some(prev) => prev.into_iter().filter(|sid| queued.contains(sid)).collect(),
            });
        }
        let targets = targets.unwrap_or_default();
        if targets.is_empty() {
            return Ok(None);
        }
        Ok(Some(Propagation {
            messages: msgs.into_iter().map(Arc::new).collect(),
            targets,
        }))
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    /// Dial a configured link now, whatever its autoconnect setting.
    pub fn connect(self: &Arc<Self>, name: &str) -> Result<(), CommandError> {
        let link = self
            .config
            .link(name)
            .cloned()
            .ok_or_else(|| CommandError::NoSuchLink(name.to_string()))?;
        if self.topology.lookup(&link.name).is_ok() || !self.autoconnect.begin(&link.name) {
            return Err(CommandError::AlreadyLinked(link.name));
        }

        info!(peer = %link.name, "Operator connect");
        tokio::spawn(network::connect_to_peer(Arc::clone(self), link));
        Ok(())
    }

    /// Close a directly attached link.
    pub fn squit(&self, name_or_sid: &str, reason: &str) -> Result<ServerId, CommandError> {
        let node = self
            .topology
            .lookup(name_or_sid)
            .map_err(|_| CommandError::NoSuchServer(name_or_sid.to_string()))?;
        if node.sid == self.local.sid {
            return Err(CommandError::LocalServer);
        }
        let handle = self
            .link(&node.sid)
            .ok_or_else(|| CommandError::NotDirect(node.sid.clone()))?;

        info!(sid = %node.sid, peer = %node.name, reason = %reason, "Operator squit");
        handle.kill(LinkError::Closed(reason.to_string()));
        Ok(node.sid)
    }

    /// CONNECT on `target`: run here if it names this server, otherwise
    /// sent there as `ENCAP <sid> RCONNECT <link>`.
    pub fn remote_connect(&self, target: &str, link: &str) -> Result<(), CommandError> {
        let node = self.remote_target(target)?;
        if node == self.local.sid {
            let this = self.this.upgrade().ok_or(CommandError::ShuttingDown)?;
            return this.connect(link);
        }
        self.forward(&node, RCONNECT, vec![link.to_string()])
    }

    /// SQUIT on `target`: run here if it names this server, otherwise sent
    /// there as `ENCAP <sid> RSQUIT <server> :<reason>`.
    pub fn remote_squit(&self, target: &str, server: &str, reason: &str) -> Result<(), CommandError> {
        let node = self.remote_target(target)?;
        if node == self.local.sid {
            return self.squit(server, reason).map(|_| ());
        }
        self.forward(&node, RSQUIT, vec![server.to_string(), reason.to_string()])
    }

    /// Carry out an RCONNECT or RSQUIT addressed to this server.
    ///
    /// Returns `false` for any other sub-command.
    pub(crate) fn run_remote(&self, source: &str, subcommand: &str, params: &[String]) -> bool {
        let result = match (subcommand.to_ascii_uppercase().as_str(), params) {
            (RCONNECT, [link, ..]) => match self.this.upgrade() {
                Some(this) => this.connect(link),
                None => Err(CommandError::ShuttingDown),
            },
            (RSQUIT, [server, rest @ ..]) => {
                let reason = rest.first().map_or("Remote SQUIT", String::as_str);
                self.squit(server, reason).map(|_| ())
            }
            (RCONNECT | RSQUIT, _) => {
                debug!(source = %source, subcommand, "Remote command without arguments");
                return true;
            }
            _ => return false,
        };
        match result {
            Ok(()) => info!(source = %source, subcommand, params = ?params, "Remote operator command"),
            Err(err) => warn!(source = %source, subcommand, error = %err, "Remote operator command failed"),
        }
        true
    }

    fn remote_target(&self, target: &str) -> Result<ServerId, CommandError> {
        self.topology
            .lookup(target)
            .map(|node| node.sid)
            .map_err(|_| CommandError::NoSuchServer(target.to_string()))
    }

    fn forward(&self, target: &ServerId, subcommand: &str, params: Vec<String>) -> Result<(), CommandError> {
        let msg = Message::from_source(
            self.local.sid.as_str(),
            Command::ENCAP(target.to_string(), subcommand.to_string(), params),
        );
        if self.relay(&msg, None).is_empty() {
            return Err(CommandError::NoSuchServer(target.to_string()));
        }
        Ok(())
    }

    /// MAP output with per-server user counts and a server total.
    pub fn map(&self) -> Vec<String> {
        let mut lines = self.topology.render_map(&self.store.user_counts());
        lines.push(format!(
            "{} servers, {} linked here",
            self.topology.server_count(),
            self.topology.local_server_count()
        ));
        lines
    }

    /// LINKS output.
    pub fn links(&self) -> Vec<LinkEntry> {
        self.topology.links()
    }

    /// Users per server, for MAP-like listings.
    pub fn user_counts(&self) -> HashMap<ServerId, usize> {
        self.store.user_counts()
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Start the autoconnect loop and, if configured, accept inbound links.
    /// Returns once shutdown has been requested.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        tokio::spawn(
            crate::sync::autoconnect::run(Arc::clone(&self)).instrument(crate::telemetry::spans::autoconnect()),
        );

        match self.config.listen.as_ref().map(|l| l.address) {
            Some(address) => network::listen(Arc::clone(&self), address).await,
            None => {
                self.shutdown.cancelled().await;
                Ok(())
            }
        }
    }

    /// Close every link with a shutdown notice and stop accepting or dialing.
    pub fn shutdown(&self) {
        info!(links = self.links.len(), "Shutting down server links");
        self.shutdown.cancel();
        for entry in self.links.iter() {
            entry
                .value()
                .kill(LinkError::Closed("Server shutting down".to_string()));
        }
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("local", &self.local.sid)
            .field("links", &self.links.len())
            .field("servers", &self.topology.len())
            .finish()
    }
}
