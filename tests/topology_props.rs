//! Property tests for the spanning-tree topology.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;
use slirc_proto::ServerId;
use slircd_link::sync::{NewServer, RouteClass, Router, Target, TopologyGraph};

fn sid(i: usize) -> ServerId {
    ServerId::new(format!("{}{:02}", i / 100, i % 100))
}

/// A tree of `parents.len() + 1` servers; server `i + 1` hangs below
/// server `parents[i] % (i + 1)`.
fn build(parents: &[usize]) -> TopologyGraph {
    let topology = TopologyGraph::new(NewServer::new(sid(0), "s0.net", "root"));
    for (i, p) in parents.iter().enumerate() {
        let child = i + 1;
        let parent = p % child;
        topology
            .add_server(
                &sid(parent),
                NewServer::new(sid(child), format!("s{child}.net"), "leaf"),
            )
            .expect("fresh sid");
    }
    topology
}

fn tree() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(any::<usize>(), 1..40)
}

#[derive(Debug, Clone)]
enum Op {
    /// Attach server `child` below the `parent`-th known server.
    Add { parent: usize, child: usize },
    /// Detach the `n`-th known server.
    Remove(usize),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        (any::<usize>(), 1usize..30).prop_map(|(parent, child)| Op::Add { parent, child }),
        any::<usize>().prop_map(Op::Remove),
    ];
    prop::collection::vec(op, 1..80)
}

/// Everything below `root` in a child-to-parent model, `root` included.
fn model_subtree(model: &BTreeMap<usize, Option<usize>>, root: usize) -> HashSet<usize> {
    let mut out = HashSet::from([root]);
    loop {
        let before = out.len();
        for (child, parent) in model {
            if parent.is_some_and(|p| out.contains(&p)) {
                out.insert(*child);
            }
        }
        if out.len() == before {
            return out;
        }
    }
}

fn depth(model: &BTreeMap<usize, Option<usize>>, mut node: usize) -> u32 {
    let mut hops = 0;
    while let Some(Some(parent)) = model.get(&node) {
        node = *parent;
        hops += 1;
    }
    hops
}

proptest! {
    #[test]
    fn built_trees_hold_invariants(parents in tree()) {
        let topology = build(&parents);
        prop_assert_eq!(topology.len(), parents.len() + 1);
        prop_assert!(topology.check_invariants().is_ok());
    }

    #[test]
    fn next_hop_is_an_adjacent_server(parents in tree()) {
        let topology = build(&parents);
        let adjacent: HashSet<ServerId> = topology.direct_children_of(&sid(0)).into_iter().collect();
        for i in 1..=parents.len() {
            let hop = topology.next_hop(&sid(i));
            prop_assert!(hop.as_ref().is_some_and(|h| adjacent.contains(h)));
            let hop = hop.unwrap();
            prop_assert!(topology.is_behind(&sid(i), &hop));
        }
        prop_assert!(topology.next_hop(&sid(0)).is_none());
    }

    #[test]
    fn burst_order_puts_parents_first_and_skips_the_peer(parents in tree(), pick in any::<usize>()) {
        let topology = build(&parents);
        let adjacent = topology.direct_children_of(&sid(0));
        let peer = adjacent[pick % adjacent.len()].clone();

        let order = topology.burst_order(&peer);
        let mut seen: HashSet<ServerId> = HashSet::from([sid(0)]);
        for node in &order {
            prop_assert!(!topology.is_behind(&node.sid, &peer));
            let parent = node.parent.clone().expect("non-root");
            prop_assert!(seen.contains(&parent), "{} before its parent", node.sid);
            seen.insert(node.sid.clone());
        }

        let expected = topology.len() - 1 - topology.subtree(&peer).len();
        prop_assert_eq!(order.len(), expected);
    }

    #[test]
    fn removing_a_subtree_keeps_the_rest_whole(parents in tree(), pick in any::<usize>()) {
        let topology = build(&parents);
        let victim = sid(1 + pick % parents.len());
        let subtree: HashSet<ServerId> = topology.subtree(&victim).into_iter().collect();
        let before = topology.len();

        let removed = topology.remove_subtree(&victim).expect("known server");
        prop_assert_eq!(removed[0].sid.clone(), victim);
        prop_assert_eq!(removed.len(), subtree.len());
        prop_assert_eq!(topology.len(), before - subtree.len());
        for sid in &subtree {
            prop_assert!(!topology.contains(sid));
        }
        prop_assert!(topology.check_invariants().is_ok());
    }

    #[test]
    fn broadcast_covers_every_server_once(parents in tree(), pick in any::<usize>()) {
        let topology = Arc::new(build(&parents));
        let router = Router::new(Arc::clone(&topology));
        let adjacent = topology.direct_children_of(&sid(0));
        let arrival = adjacent[pick % adjacent.len()].clone();

        let targets = router.targets(RouteClass::Broadcast, Some(&arrival)).unwrap();
        prop_assert!(!targets.contains(&arrival));

        // The arrival side already has it; each target forwards to its own
        // subtree. Together they must partition the tree.
        let mut reached: Vec<ServerId> = vec![sid(0)];
        reached.extend(topology.subtree(&arrival));
        for hop in &targets {
            reached.extend(topology.subtree(hop));
        }
        let unique: HashSet<&ServerId> = reached.iter().collect();
        prop_assert_eq!(unique.len(), reached.len());
        prop_assert_eq!(reached.len(), topology.len());
    }

    #[test]
    fn targeted_commands_take_one_hop_and_never_bounce(
        parents in tree(),
        pick in any::<usize>(),
        target in any::<usize>(),
    ) {
        let topology = Arc::new(build(&parents));
        let router = Router::new(Arc::clone(&topology));
        let adjacent = topology.direct_children_of(&sid(0));
        let arrival = adjacent[pick % adjacent.len()].clone();
        let target = sid(1 + target % parents.len());

        let class = RouteClass::Targeted(Target::Server(target.to_string()));
        let hops = router.targets(class, Some(&arrival)).unwrap();
        if topology.is_behind(&target, &arrival) {
            prop_assert!(hops.is_empty());
        } else {
            prop_assert_eq!(hops.len(), 1);
            prop_assert!(hops[0] != arrival);
            prop_assert!(topology.is_behind(&target, &hops[0]));
        }
    }

    #[test]
    fn interleaved_adds_and_removals_track_a_simple_model(ops in ops()) {
        let topology = TopologyGraph::new(NewServer::new(sid(0), "s0.net", "root"));
        let mut model: BTreeMap<usize, Option<usize>> = BTreeMap::from([(0, None)]);

        for op in ops {
            let known: Vec<usize> = model.keys().copied().collect();
            match op {
                Op::Add { parent, child } => {
                    let parent = known[parent % known.len()];
                    let result = topology.add_server(
                        &sid(parent),
                        NewServer::new(sid(child), format!("s{child}.net"), "leaf"),
                    );
                    if model.contains_key(&child) {
                        prop_assert!(result.is_err());
                    } else {
                        let node = result.expect("fresh server under a known parent");
                        prop_assert_eq!(node.parent, Some(sid(parent)));
                        model.insert(child, Some(parent));
                    }
                }
                Op::Remove(n) => {
                    let victim = known[n % known.len()];
                    let result = topology.remove_subtree(&sid(victim));
                    if victim == 0 {
                        prop_assert!(result.is_err());
                        continue;
                    }
                    let expected = model_subtree(&model, victim);
                    let removed: HashSet<ServerId> =
                        result.expect("known server").into_iter().map(|n| n.sid).collect();
                    let expected_sids: HashSet<ServerId> = expected.iter().map(|&i| sid(i)).collect();
                    prop_assert_eq!(removed, expected_sids);
                    model.retain(|k, _| !expected.contains(k));
                }
            }

            prop_assert!(topology.check_invariants().is_ok());
            prop_assert_eq!(topology.len(), model.len());
            for (&i, &parent) in &model {
                let node = topology.get(&sid(i)).expect("modelled server present");
                prop_assert_eq!(node.parent, parent.map(sid));
                prop_assert_eq!(node.hopcount, depth(&model, i));
            }
        }
    }
}
