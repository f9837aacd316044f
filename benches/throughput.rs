use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use slirc_proto::{Command, Message, ServerId};
use slircd_link::sync::{NewServer, Router, TopologyGraph};

// Parsing and routing overhead for relayed server traffic.

fn message_parsing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    let raw = ":00BAAAAAA PRIVMSG #channel :Hello world";
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("parse_privmsg", |b| b.iter(|| raw.parse::<Message>().unwrap()));

    let sjoin = ":00B SJOIN 1700000000 #rust +nt :@00BAAAAAA +00BAAAAAB 00BAAAAAC 00BAAAAAD";
    group.bench_function("parse_sjoin", |b| b.iter(|| sjoin.parse::<Message>().unwrap()));

    group.finish();
}

/// A hub with 8 leaves, each carrying 4 servers of its own.
fn wide_tree() -> Arc<TopologyGraph> {
    let topology = Arc::new(TopologyGraph::new(NewServer::new(ServerId::new("00A"), "hub.net", "hub")));
    for leaf in 0..8 {
        let leaf_sid = ServerId::new(format!("1{}A", leaf));
        topology
            .add_server(topology.local(), NewServer::new(leaf_sid.clone(), format!("leaf{leaf}.net"), "leaf"))
            .unwrap();
        for sub in 0..4 {
            let sid = ServerId::new(format!("2{}{}", leaf, sub));
            topology
                .add_server(&leaf_sid, NewServer::new(sid, format!("sub{leaf}-{sub}.net"), "sub"))
                .unwrap();
        }
    }
    topology
}

fn routing_benchmark(c: &mut Criterion) {
    let router = Router::new(wide_tree());
    let from = ServerId::new("13A");
    let mut group = c.benchmark_group("routing");
    group.throughput(Throughput::Elements(1));

    let broadcast = Message::from_source("00BAAAAAA", Command::QUIT(Some("bye".into())));
    group.bench_function("broadcast_quit", |b| b.iter(|| router.route(&broadcast, Some(&from)).unwrap()));

    let targeted = Message::from_source("13AAAAAAA", Command::PRIVMSG("273AAAAAA".into(), "hi".into()));
    group.bench_function("targeted_privmsg", |b| b.iter(|| router.route(&targeted, Some(&from)).unwrap()));

    group.finish();
}

criterion_group!(benches, message_parsing_benchmark, routing_benchmark);
criterion_main!(benches);
