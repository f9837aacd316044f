//! Prometheus metrics for the linking core.
//!
//! Metrics are registered once by [`init`] at startup. Every recording
//! helper is a no-op until then, so library users and tests that never call
//! `init` pay nothing.
//!
//! - `slircd_link_bytes_sent_total{peer}` / `slircd_link_bytes_received_total{peer}`
//! - `slircd_link_commands_total{peer,command}` - commands received per link
//! - `slircd_link_routed_total{class}` - routing decisions by class
//! - `slircd_link_collisions_total{kind}` - identifier collisions resolved
//! - `slircd_link_netsplits_total` - subtrees detached
//! - `slircd_link_errors_total{code}` - links closed, by error code
//! - `slircd_link_peers` - directly attached peers

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

pub static BYTES_SENT: OnceLock<IntCounterVec> = OnceLock::new();

pub static BYTES_RECEIVED: OnceLock<IntCounterVec> = OnceLock::new();

/// Commands received, by peer and command name.
pub static COMMANDS: OnceLock<IntCounterVec> = OnceLock::new();

/// Routing decisions by class (targeted, broadcast, local).
pub static ROUTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Targeted commands dropped because the target is not in the tree.
pub static UNKNOWN_TARGET: OnceLock<IntCounter> = OnceLock::new();

/// Collisions resolved, by identifier kind (nick, channel, ban).
pub static COLLISIONS: OnceLock<IntCounterVec> = OnceLock::new();

pub static NETSPLITS: OnceLock<IntCounter> = OnceLock::new();

/// Links closed, by [`LinkError`](crate::error::LinkError) code.
pub static LINK_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Autoconnect attempts by result (dialed, failed).
pub static AUTOCONNECT_ATTEMPTS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges (can increase/decrease)
// ========================================================================

/// Directly attached peers.
pub static PEERS: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at startup; later calls are ignored.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(BYTES_SENT, IntCounterVec::new(Opts::new("slircd_link_bytes_sent_total", "Bytes sent to peer servers"), &["peer"]));
    register!(BYTES_RECEIVED, IntCounterVec::new(Opts::new("slircd_link_bytes_received_total", "Bytes received from peer servers"), &["peer"]));
    register!(COMMANDS, IntCounterVec::new(Opts::new("slircd_link_commands_total", "Commands received from peer servers"), &["peer", "command"]));
    register!(ROUTED, IntCounterVec::new(Opts::new("slircd_link_routed_total", "Routing decisions by class"), &["class"]));
    register!(UNKNOWN_TARGET, IntCounter::new("slircd_link_unknown_target_total", "Targeted commands dropped for an unknown target"));
    register!(COLLISIONS, IntCounterVec::new(Opts::new("slircd_link_collisions_total", "Identifier collisions resolved"), &["kind"]));
    register!(NETSPLITS, IntCounter::new("slircd_link_netsplits_total", "Subtrees detached from the topology"));
    register!(LINK_ERRORS, IntCounterVec::new(Opts::new("slircd_link_errors_total", "Links closed by error code"), &["code"]));
    register!(AUTOCONNECT_ATTEMPTS, IntCounterVec::new(Opts::new("slircd_link_autoconnect_attempts_total", "Autoconnect attempts by result"), &["result"]));
    register!(PEERS, IntGauge::new("slircd_link_peers", "Directly attached peer servers"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

#[inline]
fn inc_vec(metric: &OnceLock<IntCounterVec>, labels: &[&str], by: u64) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc_by(by);
    }
}

#[inline]
pub fn record_bytes_sent(peer: &str, bytes: usize) {
    inc_vec(&BYTES_SENT, &[peer], bytes as u64);
}

#[inline]
pub fn record_bytes_received(peer: &str, bytes: usize) {
    inc_vec(&BYTES_RECEIVED, &[peer], bytes as u64);
}

#[inline]
pub fn record_command(peer: &str, command: &str) {
    inc_vec(&COMMANDS, &[peer, command], 1);
}

#[inline]
pub fn record_routed(class: &str) {
    inc_vec(&ROUTED, &[class], 1);
}

#[inline]
pub fn record_unknown_target() {
    if let Some(c) = UNKNOWN_TARGET.get() {
        c.inc();
    }
}

#[inline]
pub fn record_collision(kind: &str) {
    inc_vec(&COLLISIONS, &[kind], 1);
}

#[inline]
pub fn record_netsplit() {
    if let Some(c) = NETSPLITS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_link_error(code: &str) {
    inc_vec(&LINK_ERRORS, &[code], 1);
}

#[inline]
pub fn record_autoconnect(result: &str) {
    inc_vec(&AUTOCONNECT_ATTEMPTS, &[result], 1);
}

#[inline]
pub fn set_peers(count: usize) {
    if let Some(g) = PEERS.get() {
        g.set(count as i64);
    }
}
