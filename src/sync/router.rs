//! Fan-out computation for received and locally originated commands.
//!
//! The router only answers "which adjacent links does this go to". It never
//! queues or sends; the manager enqueues on every returned link.

use std::sync::Arc;

use slirc_proto::{is_valid_sid, is_valid_uid, Command, Message, ServerId};

use crate::error::RouteError;
use crate::sync::topology::TopologyGraph;

/// Where a targeted command is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A server, by SID or name.
    Server(String),
    /// A user, by UID.
    User(String),
}

/// How a command travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteClass {
    /// Along the single path toward one server or user.
    Targeted(Target),
    /// To every adjacent link except the arrival link.
    Broadcast,
    /// Consumed here.
    Local,
}

impl RouteClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Targeted(_) => "targeted",
            Self::Broadcast => "broadcast",
            Self::Local => "local",
        }
    }
}

/// Computes outbound links over the shared topology.
#[derive(Debug, Clone)]
pub struct Router {
    topology: Arc<TopologyGraph>,
}

impl Router {
    pub fn new(topology: Arc<TopologyGraph>) -> Self {
        Self { topology }
    }

    /// Classify a command by its routing behaviour.
    pub fn classify(&self, msg: &Message) -> RouteClass {
        let local = self.topology.local().as_str();
        match &msg.command {
            Command::SERVER { .. }
            | Command::SQUIT(..)
            | Command::UID { .. }
            | Command::NICK(..)
            | Command::MODE(..)
            | Command::TMODE { .. }
            | Command::SJOIN { .. }
            | Command::PART(..)
            | Command::QUIT(_)
            | Command::KILL(..)
            | Command::ADDLINE { .. }
            | Command::DELLINE(..) => RouteClass::Broadcast,

            Command::PRIVMSG(target, _) | Command::NOTICE(target, _) => {
                if target.starts_with('$') || target.starts_with('#') || target.starts_with('&') {
                    RouteClass::Broadcast
                } else if is_valid_uid(target) {
                    RouteClass::Targeted(Target::User(target.clone()))
                } else {
                    RouteClass::Targeted(Target::Server(target.clone()))
                }
            }

            Command::ENCAP(target, _, _) => {
                if target.contains('*') || target.contains('?') {
                    RouteClass::Broadcast
                } else if target == local {
                    RouteClass::Local
                } else {
                    RouteClass::Targeted(Target::Server(target.clone()))
                }
            }

            Command::PING(_, Some(target)) | Command::PONG(_, Some(target))
                if target != local && !self.names_local(target) =>
            {
                RouteClass::Targeted(Target::Server(target.clone()))
            }

            _ => RouteClass::Local,
        }
    }

    fn names_local(&self, target: &str) -> bool {
        self.topology
            .lookup(target)
            .is_ok_and(|node| node.sid == *self.topology.local())
    }

    /// Adjacent links `msg` must be forwarded on.
    ///
    /// `arrived_on` is the link the command came in on, `None` for locally
    /// originated commands. The arrival link is never part of the result.
    pub fn route(
        &self,
        msg: &Message,
        arrived_on: Option<&ServerId>,
    ) -> Result<Vec<ServerId>, RouteError> {
        self.targets(self.classify(msg), arrived_on)
    }

    /// Adjacent links for an already classified command.
    pub fn targets(
        &self,
        class: RouteClass,
        arrived_on: Option<&ServerId>,
    ) -> Result<Vec<ServerId>, RouteError> {
        match class {
            RouteClass::Local => Ok(Vec::new()),
            RouteClass::Broadcast => Ok(self.topology.path_excluding(arrived_on)),
            RouteClass::Targeted(target) => {
                let sid = self.resolve(&target)?;
                if sid == *self.topology.local() {
                    return Ok(Vec::new());
                }
                let hop = self
                    .topology
                    .next_hop(&sid)
                    .ok_or_else(|| RouteError::UnknownTarget(sid.to_string()))?;
                if Some(&hop) == arrived_on {
                    tracing::debug!(target = %sid, via = %hop, "Dropping command routed back to its arrival link");
                    return Ok(Vec::new());
                }
                Ok(vec![hop])
            }
        }
    }

    /// Owning server of a target.
    pub fn resolve(&self, target: &Target) -> Result<ServerId, RouteError> {
        let unknown = |t: &str| RouteError::UnknownTarget(t.to_string());
        match target {
            Target::User(uid) => {
                let sid = ServerId::from_uid(uid).ok_or_else(|| unknown(uid))?;
                if self.topology.contains(&sid) {
                    Ok(sid)
                } else {
                    Err(unknown(uid))
                }
            }
            Target::Server(id) if is_valid_sid(id) => {
                let sid = ServerId::new(id.as_str());
                if self.topology.contains(&sid) {
                    Ok(sid)
                } else {
                    Err(unknown(id))
                }
            }
            Target::Server(name) => self
                .topology
                .lookup(name)
                .map(|node| node.sid)
                .map_err(|_| unknown(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::topology::NewServer;

    fn sid(s: &str) -> ServerId {
        ServerId::new(s)
    }

    //      00A (local)
    //     /    \
    //   00B    00C
    //    |
    //   00D
    fn router() -> Router {
        let topology = Arc::new(TopologyGraph::new(NewServer::new(sid("00A"), "a.net", "A")));
        topology.add_server(&sid("00A"), NewServer::new(sid("00B"), "b.net", "B")).unwrap();
        topology.add_server(&sid("00A"), NewServer::new(sid("00C"), "c.net", "C")).unwrap();
        topology.add_server(&sid("00B"), NewServer::new(sid("00D"), "d.net", "D")).unwrap();
        Router::new(topology)
    }

    fn privmsg(target: &str) -> Message {
        Message::from_source("00CAAAAAA", Command::PRIVMSG(target.into(), "hi".into()))
    }

    #[test]
    fn broadcast_excludes_arrival_link() {
        let r = router();
        let quit = Message::from_source("00CAAAAAA", Command::QUIT(None));
        let mut all = r.route(&quit, None).unwrap();
        all.sort();
        assert_eq!(all, vec![sid("00B"), sid("00C")]);
        assert_eq!(r.route(&quit, Some(&sid("00C"))).unwrap(), vec![sid("00B")]);
    }

    #[test]
    fn targeted_user_goes_one_hop_toward_owner() {
        let r = router();
        assert_eq!(
            r.route(&privmsg("00DAAAAAB"), Some(&sid("00C"))).unwrap(),
            vec![sid("00B")]
        );
    }

    #[test]
    fn targeted_local_user_is_not_forwarded() {
        let r = router();
        assert!(r.route(&privmsg("00AAAAAAB"), Some(&sid("00C"))).unwrap().is_empty());
    }

    #[test]
    fn unknown_target_is_reported() {
        let r = router();
        assert_eq!(
            r.route(&privmsg("00ZAAAAAB"), None),
            Err(RouteError::UnknownTarget("00ZAAAAAB".into()))
        );
    }

    #[test]
    fn targeted_back_toward_arrival_is_dropped() {
        let r = router();
        assert!(r.route(&privmsg("00DAAAAAB"), Some(&sid("00B"))).unwrap().is_empty());
    }

    #[test]
    fn encap_by_name_and_mask() {
        let r = router();
        let one = Message::from_source("00C", Command::ENCAP("d.net".into(), "X".into(), vec![]));
        assert_eq!(r.route(&one, None).unwrap(), vec![sid("00B")]);

        let all = Message::from_source("00C", Command::ENCAP("*".into(), "X".into(), vec![]));
        assert_eq!(r.classify(&all), RouteClass::Broadcast);
    }

    #[test]
    fn ping_classification() {
        let r = router();
        let to_us = Message::from_source("00B", Command::PING("00B".into(), Some("00A".into())));
        let by_name = Message::from_source("00B", Command::PING("00B".into(), Some("a.net".into())));
        let onward = Message::from_source("00B", Command::PING("00B".into(), Some("00C".into())));
        assert_eq!(r.classify(&to_us), RouteClass::Local);
        assert_eq!(r.classify(&by_name), RouteClass::Local);
        assert_eq!(r.route(&onward, Some(&sid("00B"))).unwrap(), vec![sid("00C")]);
    }

    #[test]
    fn channel_and_mask_messages_broadcast() {
        let r = router();
        assert_eq!(r.classify(&privmsg("#chat")), RouteClass::Broadcast);
        assert_eq!(r.classify(&privmsg("$*.net")), RouteClass::Broadcast);
    }
}
