//! Network topology tracking.
//!
//! The servers of the network form a spanning tree rooted at the local
//! server. Nodes live in an arena keyed by SID; parent and children are SID
//! references, so detaching a subtree is a matter of deleting keys. All
//! mutations take the single write lock and either complete or leave the
//! tree untouched, so readers never observe a half-attached subtree.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use slirc_proto::{irc_to_lower, is_valid_sid, ServerId};

use crate::error::TopologyError;

/// Lifecycle flag of a server entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Reachable and past its burst.
    Live,
    /// Introduced over a link that has not finished bursting.
    Bursting,
    /// Removed from the tree; only seen on nodes returned by
    /// [`TopologyGraph::remove_subtree`].
    Detached,
}

/// A server in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNode {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
    /// Hops from the local server; the parent's hop count plus one.
    pub hopcount: u32,
    /// `None` only for the local server.
    pub parent: Option<ServerId>,
    pub children: BTreeSet<ServerId>,
    pub created_at: DateTime<Utc>,
    pub state: ServerState,
}

/// Identity of a server being attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewServer {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
    pub state: ServerState,
}

impl NewServer {
    pub fn new(sid: ServerId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            sid,
            name: name.into(),
            description: description.into(),
            state: ServerState::Live,
        }
    }

    #[must_use]
    pub fn bursting(mut self) -> Self {
        self.state = ServerState::Bursting;
        self
    }
}

/// One row of a LINKS listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub name: String,
    /// Name of the parent; the local server lists itself.
    pub uplink: String,
    pub hopcount: u32,
    pub description: String,
}

#[derive(Debug)]
struct Graph {
    nodes: HashMap<ServerId, ServerNode>,
    /// Folded name to SID.
    names: HashMap<String, ServerId>,
}

impl Graph {
    /// Whether `sid` lies in the subtree rooted at `ancestor` (inclusive).
    fn is_within(&self, sid: &ServerId, ancestor: &ServerId) -> bool {
        let mut current = Some(sid);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent.as_ref());
        }
        false
    }

    /// Pre-order walk of the subtree rooted at `sid`, children in SID order.
    fn subtree(&self, sid: &ServerId) -> Vec<ServerId> {
        let mut order = Vec::new();
        let mut stack = vec![sid.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
                order.push(current);
            }
        }
        order
    }
}

/// The spanning tree of known servers.
#[derive(Debug)]
pub struct TopologyGraph {
    local: ServerId,
    inner: RwLock<Graph>,
}

impl TopologyGraph {
    /// A tree holding only the local server.
    pub fn new(local: NewServer) -> Self {
        let sid = local.sid.clone();
        let root = ServerNode {
            sid: sid.clone(),
            name: local.name.clone(),
            description: local.description,
            hopcount: 0,
            parent: None,
            children: BTreeSet::new(),
            created_at: Utc::now(),
            state: ServerState::Live,
        };
        let mut nodes = HashMap::new();
        nodes.insert(sid.clone(), root);
        let mut names = HashMap::new();
        names.insert(irc_to_lower(&local.name), sid.clone());

        Self {
            local: sid,
            inner: RwLock::new(Graph { nodes, names }),
        }
    }

    /// SID of the root.
    pub fn local(&self) -> &ServerId {
        &self.local
    }

    /// Attach `server` below `parent`.
    ///
    /// Fails with `WouldCreateCycle` if the server already exists and
    /// `parent` lies inside its subtree, with `DuplicateServer` if the SID or
    /// name is taken, and with `UnknownParent` if `parent` is not in the tree.
    pub fn add_server(
        &self,
        parent: &ServerId,
        server: NewServer,
    ) -> Result<ServerNode, TopologyError> {
        let mut graph = self.inner.write();

        if *parent == server.sid || graph.is_within(parent, &server.sid) {
            return Err(TopologyError::WouldCreateCycle(server.sid.to_string()));
        }
        if graph.nodes.contains_key(&server.sid) {
            return Err(TopologyError::DuplicateServer(server.sid.to_string()));
        }
        let folded = irc_to_lower(&server.name);
        if graph.names.contains_key(&folded) {
            return Err(TopologyError::DuplicateServer(server.name));
        }
        let Some(parent_node) = graph.nodes.get_mut(parent) else {
            return Err(TopologyError::UnknownParent(parent.to_string()));
        };

        parent_node.children.insert(server.sid.clone());
        let node = ServerNode {
            sid: server.sid.clone(),
            name: server.name,
            description: server.description,
            hopcount: parent_node.hopcount + 1,
            parent: Some(parent.clone()),
            children: BTreeSet::new(),
            created_at: Utc::now(),
            state: server.state,
        };
        graph.names.insert(folded, server.sid.clone());
        graph.nodes.insert(server.sid, node.clone());
        Ok(node)
    }

    /// Detach `sid` and everything below it.
    ///
    /// Returns the removed nodes parent-first, marked [`ServerState::Detached`].
    pub fn remove_subtree(&self, sid: &ServerId) -> Result<Vec<ServerNode>, TopologyError> {
        if *sid == self.local {
            return Err(TopologyError::LocalServer);
        }

        let mut graph = self.inner.write();
        let Some(parent) = graph.nodes.get(sid).map(|n| n.parent.clone()) else {
            return Err(TopologyError::NotFound(sid.to_string()));
        };

        let doomed = graph.subtree(sid);
        if let Some(parent) = parent
            && let Some(node) = graph.nodes.get_mut(&parent)
        {
            node.children.remove(sid);
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            if let Some(mut node) = graph.nodes.remove(&id) {
                graph.names.remove(&irc_to_lower(&node.name));
                node.state = ServerState::Detached;
                removed.push(node);
            }
        }
        Ok(removed)
    }

    /// Find a server by SID or (case-insensitive) name.
    pub fn lookup(&self, id_or_name: &str) -> Result<ServerNode, TopologyError> {
        let graph = self.inner.read();
        let by_sid = is_valid_sid(id_or_name)
            .then(|| graph.nodes.get(&ServerId::new(id_or_name)))
            .flatten();
        by_sid
            .or_else(|| {
                graph
                    .names
                    .get(&irc_to_lower(id_or_name))
                    .and_then(|sid| graph.nodes.get(sid))
            })
            .cloned()
            .ok_or_else(|| TopologyError::NotFound(id_or_name.to_string()))
    }

    pub fn get(&self, sid: &ServerId) -> Option<ServerNode> {
        self.inner.read().nodes.get(sid).cloned()
    }

    pub fn contains(&self, sid: &ServerId) -> bool {
        self.inner.read().nodes.contains_key(sid)
    }

    pub fn direct_children_of(&self, sid: &ServerId) -> Vec<ServerId> {
        self.inner
            .read()
            .nodes
            .get(sid)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Adjacent servers of the local server, minus the one a message came from.
    pub fn path_excluding(&self, from: Option<&ServerId>) -> Vec<ServerId> {
        self.direct_children_of(&self.local)
            .into_iter()
            .filter(|sid| Some(sid) != from)
            .collect()
    }

    /// The adjacent server on the path toward `target`.
    ///
    /// `None` if the target is the local server or unknown.
    pub fn next_hop(&self, target: &ServerId) -> Option<ServerId> {
        let graph = self.inner.read();
        let mut current = graph.nodes.get(target)?;
        loop {
            let parent = current.parent.as_ref()?;
            if *parent == self.local {
                return Some(current.sid.clone());
            }
            current = graph.nodes.get(parent)?;
        }
    }

    /// Whether `sid` is `link` itself or lies behind it.
    pub fn is_behind(&self, sid: &ServerId, link: &ServerId) -> bool {
        self.inner.read().is_within(sid, link)
    }

    /// SIDs of the subtree rooted at `sid`, parent first.
    pub fn subtree(&self, sid: &ServerId) -> Vec<ServerId> {
        self.inner.read().subtree(sid)
    }

    /// Set the state of every server in the subtree rooted at `sid`.
    pub fn set_subtree_state(&self, sid: &ServerId, state: ServerState) {
        let mut graph = self.inner.write();
        for id in graph.subtree(sid) {
            if let Some(node) = graph.nodes.get_mut(&id) {
                node.state = state;
            }
        }
    }

    /// Servers to introduce to a newly linked peer: breadth-first so every
    /// parent precedes its children, skipping the local server and the
    /// peer's own subtree.
    pub fn burst_order(&self, peer: &ServerId) -> Vec<ServerNode> {
        let graph = self.inner.read();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.local.clone()]);

        while let Some(sid) = queue.pop_front() {
            let Some(node) = graph.nodes.get(&sid) else {
                continue;
            };
            for child in &node.children {
                if child != peer {
                    queue.push_back(child.clone());
                }
            }
            if sid != self.local {
                order.push(node.clone());
            }
        }
        order
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// Servers on the network, this one included.
    pub fn server_count(&self) -> usize {
        self.len()
    }

    /// Servers linked directly to this one.
    pub fn local_server_count(&self) -> usize {
        self.inner
            .read()
            .nodes
            .get(&self.local)
            .map_or(0, |n| n.children.len())
    }

    /// LINKS listing, in tree order.
    pub fn links(&self) -> Vec<LinkEntry> {
        let graph = self.inner.read();
        graph
            .subtree(&self.local)
            .into_iter()
            .filter_map(|sid| graph.nodes.get(&sid))
            .map(|node| LinkEntry {
                name: node.name.clone(),
                uplink: node
                    .parent
                    .as_ref()
                    .and_then(|p| graph.nodes.get(p))
                    .unwrap_or(node)
                    .name
                    .clone(),
                hopcount: node.hopcount,
                description: node.description.clone(),
            })
            .collect()
    }

    /// MAP rendering, one line per server, with optional user counts.
    pub fn render_map(&self, user_counts: &HashMap<ServerId, usize>) -> Vec<String> {
        fn traverse(
            graph: &Graph,
            sid: &ServerId,
            prefix: &str,
            is_last: bool,
            user_counts: &HashMap<ServerId, usize>,
            lines: &mut Vec<String>,
        ) {
            let Some(node) = graph.nodes.get(sid) else {
                return;
            };

            let connector = if prefix.is_empty() {
                "`-".to_string()
            } else if is_last {
                format!("{}`-", prefix)
            } else {
                format!("{}|-", prefix)
            };
            let count = user_counts
                .get(sid)
                .map(|n| format!(" [{} users]", n))
                .unwrap_or_default();
            lines.push(format!("{} {} ({}){}", connector, node.name, node.sid, count));

            let child_prefix = if prefix.is_empty() {
                "   ".to_string()
            } else if is_last {
                format!("{}   ", prefix)
            } else {
                format!("{}|  ", prefix)
            };

            let mut children: Vec<&ServerNode> = node
                .children
                .iter()
                .filter_map(|c| graph.nodes.get(c))
                .collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            let total = children.len();
            for (idx, child) in children.into_iter().enumerate() {
                traverse(
                    graph,
                    &child.sid,
                    &child_prefix,
                    idx + 1 == total,
                    user_counts,
                    lines,
                );
            }
        }

        let graph = self.inner.read();
        let mut lines = Vec::new();
        traverse(&graph, &self.local, "", true, user_counts, &mut lines);
        lines
    }

    /// Verify the tree invariants: a single root, parent/child links agree,
    /// hop counts increase by one per level, every node is reachable from
    /// the root and the name index matches.
    pub fn check_invariants(&self) -> Result<(), String> {
        let graph = self.inner.read();

        let roots: Vec<_> = graph.nodes.values().filter(|n| n.parent.is_none()).collect();
        if roots.len() != 1 || roots[0].sid != self.local {
            return Err(format!("expected single root {}, found {}", self.local, roots.len()));
        }

        for node in graph.nodes.values() {
            if let Some(parent) = &node.parent {
                let p = graph
                    .nodes
                    .get(parent)
                    .ok_or_else(|| format!("{} has missing parent {}", node.sid, parent))?;
                if !p.children.contains(&node.sid) {
                    return Err(format!("{} not listed under parent {}", node.sid, parent));
                }
                if node.hopcount != p.hopcount + 1 {
                    return Err(format!("{} has hop count {}", node.sid, node.hopcount));
                }
            } else if node.hopcount != 0 {
                return Err("root hop count is not zero".to_string());
            }
            for child in &node.children {
                match graph.nodes.get(child) {
                    Some(c) if c.parent.as_ref() == Some(&node.sid) => {}
                    _ => return Err(format!("{} lists stray child {}", node.sid, child)),
                }
            }
        }

        if graph.subtree(&self.local).len() != graph.nodes.len() {
            return Err("unreachable servers present".to_string());
        }
        if graph.names.len() != graph.nodes.len() {
            return Err("name index out of sync".to_string());
        }
        Ok(())
    }
}
