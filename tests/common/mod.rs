//! Integration test common infrastructure.
//!
//! Provides an in-memory network of link managers wired together through
//! duplex pipes, plus polling helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use slirc_proto::{Message, ServerId};
use slircd_link::config::{Config, LinkBlock};
use slircd_link::state::{NetworkState, UserRecord};
use slircd_link::sync::network::serve_inbound;
use slircd_link::sync::{BoxedStream, Dialer, SyncManager};
use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;

pub const LINK_PASSWORD: &str = "linkpw";

pub fn sid(s: &str) -> ServerId {
    ServerId::new(s)
}

pub fn user(uid: &str, nick: &str, ts: u64) -> UserRecord {
    UserRecord {
        uid: uid.to_string(),
        nick: nick.to_string(),
        ts,
        user: "ident".to_string(),
        host: "host.example".to_string(),
        modes: "+i".to_string(),
        realname: "Test User".to_string(),
    }
}

/// Config for `name`/`sid` with a link block per `(name, sid)` peer.
pub fn config(name: &str, sid: &str, peers: &[(&str, &str)], extra: &str) -> Config {
    let mut text = format!(
        "[server]\nname = \"{name}\"\nsid = \"{sid}\"\ndescription = \"{name} test\"\nnetwork = \"TestNet\"\n\n\
         [timeouts]\nping_interval = 30\nping_timeout = 90\nhandshake = 5\nburst = 10\n\n{extra}\n"
    );
    for (peer, peer_sid) in peers {
        text.push_str(&format!(
            "[[links]]\nname = \"{peer}\"\nhostname = \"127.0.0.1\"\nport = 7000\n\
             password = \"{LINK_PASSWORD}\"\nsid = \"{peer_sid}\"\n\n"
        ));
    }
    Config::from_toml(&text).expect("test config parses")
}

/// Managers reachable from each other by server name.
#[derive(Clone, Default)]
pub struct Network {
    servers: Arc<Mutex<HashMap<String, Arc<SyncManager>>>>,
}

impl Network {
    pub fn spawn(&self, name: &str, sid: &str, peers: &[(&str, &str)]) -> Arc<SyncManager> {
        self.spawn_with(config(name, sid, peers, ""))
    }

    pub fn spawn_with(&self, config: Config) -> Arc<SyncManager> {
        let name = config.server.name.clone();
        let manager = SyncManager::with_dialer(config, Arc::new(NetworkState::new()), Arc::new(self.clone()));
        self.servers.lock().insert(name, Arc::clone(&manager));
        manager
    }
}

#[async_trait]
impl Dialer for Network {
    async fn dial(&self, link: &LinkBlock) -> io::Result<BoxedStream> {
        let peer = self
            .servers
            .lock()
            .get(&link.name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, link.name.clone()))?;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_inbound(peer, Box::new(theirs)));
        Ok(Box::new(ours))
    }
}

/// Poll `cond` until it holds, panicking after five seconds.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Everything currently queued on a link, as wire lines.
pub fn drain(rx: &mut Receiver<Arc<Message>>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        lines.push(msg.to_line().expect("serializable"));
    }
    lines
}
