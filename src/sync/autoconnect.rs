//! Outbound link scheduling with exponential backoff.
//!
//! A periodic tick compares configured links against the topology and
//! dials any autoconnect link that is down and due. Attempts run as their
//! own tasks; their outcome is reported back through [`on_failure`] and
//! [`on_closed`].
//!
//! [`on_failure`]: AutoconnectScheduler::on_failure
//! [`on_closed`]: AutoconnectScheduler::on_closed

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use slirc_proto::irc_to_lower;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{AutoconnectConfig, LinkBlock};
use crate::sync::manager::SyncManager;
use crate::sync::network;

/// Retry bookkeeping for one link block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAutoconnect {
    /// Earliest time of the next attempt.
    pub next_retry: Instant,
    /// Delay applied after the last failure; zero after a success.
    pub backoff: Duration,
    pub failures: u32,
    /// An attempt or an established link exists for this block.
    pub in_flight: bool,
}

impl PendingAutoconnect {
    fn new(now: Instant) -> Self {
        Self {
            next_retry: now,
            backoff: Duration::ZERO,
            failures: 0,
            in_flight: false,
        }
    }
}

/// Per-link retry state, keyed by folded link name.
#[derive(Debug)]
pub struct AutoconnectScheduler {
    policy: AutoconnectConfig,
    pending: Mutex<HashMap<String, PendingAutoconnect>>,
}

impl AutoconnectScheduler {
    pub fn new(policy: AutoconnectConfig) -> Self {
        Self {
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &AutoconnectConfig {
        &self.policy
    }

    /// Links to dial now. Each returned link is marked in flight.
    ///
    /// `is_linked` reports whether the named server is already in the tree.
    pub fn due(
        &self,
        links: &[LinkBlock],
        now: Instant,
        is_linked: impl Fn(&LinkBlock) -> bool,
    ) -> Vec<LinkBlock> {
        let mut pending = self.pending.lock();
        links
            .iter()
            .filter(|link| link.autoconnect && !is_linked(link))
            .filter(|link| {
                let entry = pending
                    .entry(irc_to_lower(&link.name))
                    .or_insert_with(|| PendingAutoconnect::new(now));
                if entry.in_flight || now < entry.next_retry {
                    return false;
                }
                entry.in_flight = true;
                true
            })
            .cloned()
            .collect()
    }

    /// Claim a link for an operator connect. False if an attempt or link
    /// already exists.
    pub fn begin(&self, name: &str) -> bool {
        let mut pending = self.pending.lock();
        let entry = pending
            .entry(irc_to_lower(name))
            .or_insert_with(|| PendingAutoconnect::new(Instant::now()));
        if entry.in_flight {
            return false;
        }
        entry.in_flight = true;
        true
    }

    /// An attempt ended without reaching an established link. Returns the
    /// delay before the next attempt.
    pub fn on_failure(&self, name: &str, now: Instant) -> Duration {
        let mut pending = self.pending.lock();
        let entry = pending
            .entry(irc_to_lower(name))
            .or_insert_with(|| PendingAutoconnect::new(now));

        entry.backoff = if entry.backoff.is_zero() {
            self.policy.initial_backoff()
        } else {
            (entry.backoff * 2).min(self.policy.max_backoff())
        };
        entry.failures += 1;
        entry.next_retry = now + entry.backoff;
        entry.in_flight = false;
        entry.backoff
    }

    /// A link to `name` reached the established state.
    pub fn on_established(&self, name: &str) {
        let mut pending = self.pending.lock();
        let entry = pending
            .entry(irc_to_lower(name))
            .or_insert_with(|| PendingAutoconnect::new(Instant::now()));
        entry.backoff = Duration::ZERO;
        entry.failures = 0;
        entry.in_flight = true;
    }

    /// An established link to `name` went away; it may be redialed at once.
    pub fn on_closed(&self, name: &str, now: Instant) {
        let mut pending = self.pending.lock();
        let entry = pending
            .entry(irc_to_lower(name))
            .or_insert_with(|| PendingAutoconnect::new(now));
        entry.in_flight = false;
        entry.next_retry = now + entry.backoff;
    }

    pub fn state(&self, name: &str) -> Option<PendingAutoconnect> {
        self.pending.lock().get(&irc_to_lower(name)).cloned()
    }
}

/// Tick until shutdown, dialing due links.
pub async fn run(manager: Arc<SyncManager>) {
    let mut ticker = tokio::time::interval(manager.autoconnect().policy().tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = manager.shutdown_token().clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Autoconnect loop stopping");
                return;
            }
            _ = ticker.tick() => {
                let due = manager.autoconnect().due(
                    &manager.config().links,
                    Instant::now(),
                    |link| manager.topology().lookup(&link.name).is_ok(),
                );
                for link in due {
                    info!(peer = %link.name, address = %link.address(), "Autoconnecting");
                    tokio::spawn(network::connect_to_peer(Arc::clone(&manager), link));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64) -> AutoconnectConfig {
        AutoconnectConfig {
            tick: 1,
            initial_backoff: initial,
            max_backoff: max,
        }
    }

    fn link(name: &str, autoconnect: bool) -> LinkBlock {
        LinkBlock {
            name: name.to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 7000,
            password: "pw".to_string(),
            autoconnect,
            sid: None,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let scheduler = AutoconnectScheduler::new(policy(1, 8));
        let now = Instant::now();
        let delays: Vec<u64> = (0..5)
            .map(|_| scheduler.on_failure("leaf.net", now).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);
        assert_eq!(scheduler.state("leaf.net").unwrap().failures, 5);
    }

    #[test]
    fn failed_link_waits_for_backoff() {
        let scheduler = AutoconnectScheduler::new(policy(1, 8));
        let links = vec![link("leaf.net", true)];
        let start = Instant::now();

        assert_eq!(scheduler.due(&links, start, |_| false).len(), 1);
        // In flight: not dialed twice.
        assert!(scheduler.due(&links, start, |_| false).is_empty());

        scheduler.on_failure("leaf.net", start);
        scheduler.on_failure("leaf.net", start);
        assert!(scheduler
            .due(&links, start + Duration::from_millis(1500), |_| false)
            .is_empty());
        assert_eq!(
            scheduler
                .due(&links, start + Duration::from_secs(2), |_| false)
                .len(),
            1
        );
    }

    #[test]
    fn manual_and_linked_blocks_are_skipped() {
        let scheduler = AutoconnectScheduler::new(policy(1, 8));
        let links = vec![link("manual.net", false), link("up.net", true)];
        let due = scheduler.due(&links, Instant::now(), |l| l.name == "up.net");
        assert!(due.is_empty());
    }

    #[test]
    fn success_resets_backoff() {
        let scheduler = AutoconnectScheduler::new(policy(1, 8));
        let now = Instant::now();
        scheduler.on_failure("leaf.net", now);
        scheduler.on_failure("leaf.net", now);
        scheduler.on_established("LEAF.net");

        let state = scheduler.state("leaf.net").unwrap();
        assert_eq!(state.backoff, Duration::ZERO);
        assert_eq!(state.failures, 0);
        assert!(state.in_flight);

        scheduler.on_closed("leaf.net", now);
        assert_eq!(scheduler.due(&[link("leaf.net", true)], now, |_| false).len(), 1);
        assert_eq!(scheduler.on_failure("leaf.net", now), Duration::from_secs(1));
    }

    #[test]
    fn operator_connect_claims_the_link() {
        let scheduler = AutoconnectScheduler::new(policy(1, 8));
        assert!(scheduler.begin("leaf.net"));
        assert!(!scheduler.begin("leaf.net"));
        assert!(scheduler
            .due(&[link("leaf.net", true)], Instant::now(), |_| false)
            .is_empty());
    }
}
