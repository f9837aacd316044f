//! UID allocation for users connecting to this server.

use std::sync::atomic::{AtomicU64, Ordering};

use slirc_proto::ServerId;

/// Letters first so the first UID of a server reads `<sid>AAAAAA`.
const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 6;

/// Hands out `<sid><6 chars>` identifiers in sequence.
///
/// The sequence wraps after 36^6 users; a store still holding the wrapped
/// UID rejects the introduction with `UidInUse`.
#[derive(Debug)]
pub struct UidGenerator {
    sid: ServerId,
    issued: AtomicU64,
}

impl UidGenerator {
    pub fn new(sid: ServerId) -> Self {
        Self {
            sid,
            issued: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        let mut uid = String::with_capacity(3 + SUFFIX_LEN);
        uid.push_str(self.sid.as_str());
        uid.extend(suffix(n).iter().map(|&b| b as char));
        uid
    }

    /// How many UIDs have been handed out.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

fn suffix(mut n: u64) -> [u8; SUFFIX_LEN] {
    let mut out = [ALPHABET[0]; SUFFIX_LEN];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(n % 36) as usize];
        n /= 36;
    }
    out
}
