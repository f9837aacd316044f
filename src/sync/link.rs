//! Per-link handle held in the link registry.
//!
//! The I/O task owns the transport; everything else reaches the peer through
//! this handle: a bounded send queue, a cancellation token and counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use slirc_proto::{Message, ServerId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;

/// Traffic counters for one link.
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub lines_sent: AtomicU64,
    pub lines_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

/// A directly attached peer.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub sid: ServerId,
    pub name: String,
    tx: mpsc::Sender<Arc<Message>>,
    capacity: usize,
    cancel: CancellationToken,
    /// Why the link was killed, read by the I/O task on cancellation.
    close_reason: Arc<Mutex<Option<LinkError>>>,
    pub connected_at: Instant,
    pub counters: Arc<LinkCounters>,
}

impl LinkHandle {
    /// Create a handle and the receiving end of its send queue.
    pub fn new(
        sid: ServerId,
        name: impl Into<String>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            sid,
            name: name.into(),
            tx,
            capacity,
            cancel,
            close_reason: Arc::new(Mutex::new(None)),
            connected_at: Instant::now(),
            counters: Arc::new(LinkCounters::default()),
        };
        (handle, rx)
    }

    /// Queue a line for the peer without waiting.
    ///
    /// A full queue means the peer is not keeping up; the caller is expected
    /// to kill this link rather than wait on it.
    pub fn enqueue(&self, msg: Arc<Message>) -> Result<(), LinkError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(LinkError::SendQueueOverflow(self.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(LinkError::Closed(format!("{} send queue closed", self.name)))
            }
        }
    }

    /// Ask the I/O task to close the link. The first reason wins.
    pub fn kill(&self, err: LinkError) {
        {
            let mut reason = self.close_reason.lock();
            if reason.is_none() {
                *reason = Some(err);
            }
        }
        self.cancel.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Take the reason passed to [`kill`](Self::kill), if any.
    pub fn take_close_reason(&self) -> Option<LinkError> {
        self.close_reason.lock().take()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.counters.lines_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
        crate::metrics::record_bytes_sent(self.sid.as_str(), bytes);
    }

    pub fn record_received(&self, bytes: usize) {
        self.counters.lines_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        crate::metrics::record_bytes_received(self.sid.as_str(), bytes);
    }
}
