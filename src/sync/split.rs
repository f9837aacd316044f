//! Netsplit handling.
//!
//! When a link drops, or a peer reports that a server behind it is gone,
//! the whole subtree is detached from the topology in one step. Every user
//! on a removed server is then quit locally and announced to the remaining
//! links, followed by a single `SQUIT` for the subtree root.

use std::collections::HashSet;

use slirc_proto::{Command, Message, ServerId};
use tracing::{debug, info};

use crate::error::TopologyError;
use crate::state::{StateChange, UserRecord};
use crate::sync::events::NetworkEvent;
use crate::sync::manager::SyncManager;
use crate::sync::topology::ServerNode;

/// Quit reason for users lost in a split.
pub const SPLIT_QUIT_REASON: &str = "server split";

/// What a split removed.
#[derive(Debug, Default)]
pub struct SplitOutcome {
    /// Detached servers, subtree root first.
    pub removed: Vec<ServerNode>,
    /// Users quit because their server was detached.
    pub quits: Vec<UserRecord>,
}

impl SplitOutcome {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Detach `sid` and its subtree.
///
/// `reported_by` is the link that told us about the loss, if any; nothing
/// is sent back on it. Calling this for a server that is already gone does
/// nothing.
pub fn on_link_lost(
    manager: &SyncManager,
    sid: &ServerId,
    reported_by: Option<&ServerId>,
    reason: &str,
) -> SplitOutcome {
    let handle = manager.remove_link(sid);

    let removed = match manager.topology().remove_subtree(sid) {
        Ok(removed) => removed,
        Err(TopologyError::NotFound(_) | TopologyError::LocalServer) => {
            debug!(sid = %sid, "Split for server not in topology");
            return SplitOutcome::default();
        }
        Err(err) => {
            debug!(sid = %sid, error = %err, "Split failed");
            return SplitOutcome::default();
        }
    };

    let sids: HashSet<ServerId> = removed.iter().map(|n| n.sid.clone()).collect();
    let users = manager.store().users_owned_by(&sids);

    info!(
        sid = %sid,
        servers = removed.len(),
        users = users.len(),
        direct = handle.is_some(),
        reason = %reason,
        "Netsplit"
    );

    let mut quits = Vec::with_capacity(users.len());
    for user in users {
        if manager
            .store()
            .apply(StateChange::RemoveUser {
                uid: user.uid.clone(),
            })
            .is_err()
        {
            continue;
        }
        let quit = Message::from_source(
            user.uid.as_str(),
            Command::QUIT(Some(SPLIT_QUIT_REASON.to_string())),
        );
        manager.relay(&quit, reported_by);
        manager.events().publish(NetworkEvent::UserQuit {
            uid: user.uid.clone(),
            nick: user.nick.clone(),
            reason: SPLIT_QUIT_REASON.to_string(),
        });
        quits.push(user);
    }

    let squit = Message::from_source(
        manager.local_sid().as_str(),
        Command::SQUIT(sid.to_string(), reason.to_string()),
    );
    manager.relay(&squit, reported_by);

    crate::metrics::record_netsplit();
    let name = removed.first().map(|n| n.name.clone()).unwrap_or_default();
    manager.events().publish(NetworkEvent::ServerSplit {
        sid: sid.clone(),
        name,
        removed: removed.iter().map(|n| n.sid.clone()).collect(),
        users_lost: quits.len(),
        reason: reason.to_string(),
    });

    SplitOutcome { removed, quits }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::state::{NetworkState, StateStore};
    use crate::sync::link::LinkHandle;
    use crate::sync::topology::{NewServer, ServerState};
    use tokio_util::sync::CancellationToken;

    fn manager() -> Arc<SyncManager> {
        let config = Config::from_toml(
            r#"
            [server]
            name = "a.net"
            sid = "00A"
            description = "A"
            network = "Test"
            "#,
        )
        .unwrap();
        SyncManager::new(config, Arc::new(NetworkState::new()))
    }

    fn user(uid: &str, nick: &str) -> UserRecord {
        UserRecord {
            uid: uid.into(),
            nick: nick.into(),
            ts: 100,
            user: "u".into(),
            host: "h".into(),
            modes: "+".into(),
            realname: "r".into(),
        }
    }

    fn sid(s: &str) -> ServerId {
        ServerId::new(s)
    }

    /// a.net (00A) with direct links to 00B and 00D, and 00C behind 00B.
    fn network() -> (
        Arc<SyncManager>,
        tokio::sync::mpsc::Receiver<Arc<Message>>,
        tokio::sync::mpsc::Receiver<Arc<Message>>,
    ) {
        let m = manager();
        let t = m.topology();
        t.add_server(&sid("00A"), NewServer::new(sid("00B"), "b.net", "B")).unwrap();
        t.add_server(&sid("00B"), NewServer::new(sid("00C"), "c.net", "C")).unwrap();
        t.add_server(&sid("00A"), NewServer::new(sid("00D"), "d.net", "D")).unwrap();

        let (b, rx_b) = LinkHandle::new(sid("00B"), "b.net", 64, CancellationToken::new());
        let (d, rx_d) = LinkHandle::new(sid("00D"), "d.net", 64, CancellationToken::new());
        m.register_link(b);
        m.register_link(d);

        for u in [user("00CAAAAAA", "c1"), user("00CAAAAAB", "c2"), user("00BAAAAAA", "b1"), user("00DAAAAAA", "d1")] {
            m.store().apply(StateChange::IntroduceUser(u)).unwrap();
        }
        (m, rx_b, rx_d)
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Arc<Message>>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            lines.push(msg.to_line().unwrap());
        }
        lines
    }

    // ========================================================================
    // Splits
    // ========================================================================

    #[test]
    fn remote_squit_removes_subtree_and_quits_users() {
        let (m, mut rx_b, mut rx_d) = network();

        let outcome = on_link_lost(&m, &sid("00C"), Some(&sid("00B")), "c.net lost");
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].state, ServerState::Detached);
        assert_eq!(outcome.quits.len(), 2);
        assert!(m.store().user("00CAAAAAA").is_none());
        assert!(m.store().user("00BAAAAAA").is_some());

        // Nothing goes back to the reporting link.
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(
            drain(&mut rx_d),
            vec![
                ":00CAAAAAA QUIT :server split".to_string(),
                ":00CAAAAAB QUIT :server split".to_string(),
                ":00A SQUIT 00C :c.net lost".to_string(),
            ]
        );
        m.topology().check_invariants().unwrap();
    }

    #[test]
    fn direct_link_loss_takes_everything_behind_it() {
        let (m, _rx_b, mut rx_d) = network();

        let outcome = on_link_lost(&m, &sid("00B"), None, "b.net closed");
        let removed: Vec<ServerId> = outcome.removed.iter().map(|n| n.sid.clone()).collect();
        assert_eq!(removed, vec![sid("00B"), sid("00C")]);
        assert_eq!(outcome.quits.len(), 3);
        assert!(m.link(&sid("00B")).is_none());
        assert_eq!(m.topology().len(), 2);
        assert_eq!(drain(&mut rx_d).len(), 4);
    }

    #[test]
    fn second_call_is_a_no_op() {
        let (m, _rx_b, mut rx_d) = network();
        assert!(!on_link_lost(&m, &sid("00C"), Some(&sid("00B")), "lost").is_empty());
        drain(&mut rx_d);

        let again = on_link_lost(&m, &sid("00C"), Some(&sid("00B")), "lost");
        assert!(again.is_empty());
        assert!(again.quits.is_empty());
        assert!(drain(&mut rx_d).is_empty());
    }

    #[tokio::test]
    async fn split_publishes_events() {
        let (m, _rx_b, _rx_d) = network();
        let mut events = m.events().subscribe();

        on_link_lost(&m, &sid("00C"), Some(&sid("00B")), "lost");

        let mut quits = 0;
        loop {
            match events.recv().await.unwrap() {
                NetworkEvent::UserQuit { reason, .. } => {
                    assert_eq!(reason, SPLIT_QUIT_REASON);
                    quits += 1;
                }
                NetworkEvent::ServerSplit { sid: split, users_lost, .. } => {
                    assert_eq!(split, sid("00C"));
                    assert_eq!(users_lost, 2);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(quits, 2);
    }
}
