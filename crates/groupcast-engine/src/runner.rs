//! Per-connection write serialization.
//!
//! The transport socket is not assumed write-thread-safe; the [`Runner`]
//! is the single point through which every outbound packet for one
//! connection passes. Callers get a synchronous, non-blocking
//! [`RetCode`]; the embedding layer owns the receiving half of the queue
//! and performs the actual transport writes in accepted order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use groupcast_core::{Packet, RetCode};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::SEND_DROPS_TOTAL;

/// Default outbound queue capacity per connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Write-serialization authority for one connection's outbound stream.
///
/// Packets accepted by [`Runner::send`] appear on the wire in acceptance
/// order.
///
/// ## Close policy
///
/// [`Runner::close`] first flips the closed flag — every later `send`
/// fails fast with `SESSION_CLOSED` — then enqueues a CLOSE frame
/// best-effort. Packets accepted before the flag flipped stay queued and
/// are flushed by the writer before it tears the transport down; the
/// writer stops at the first CLOSE frame it drains.
pub struct Runner {
    tx: mpsc::Sender<Packet>,
    closed: AtomicBool,
    faulted: AtomicBool,
    drops: AtomicU64,
}

impl Runner {
    /// Create a runner and the receiving half of its queue. The embedding
    /// layer drains the receiver into the transport.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let runner = Arc::new(Self {
            tx,
            closed: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            drops: AtomicU64::new(0),
        });
        (runner, rx)
    }

    /// Queue one packet for the transport. Never blocks.
    ///
    /// - `SESSION_CLOSED` — runner closed, or the writer side is gone
    /// - `SEND_EXCEPTION` — the writer reported an I/O fault
    /// - `ILLEGAL_BUFFER` — outbound queue full (packet dropped)
    pub fn send(&self, packet: Packet) -> RetCode {
        if self.closed.load(Ordering::Acquire) {
            return RetCode::SESSION_CLOSED;
        }
        if self.faulted.load(Ordering::Acquire) {
            return RetCode::SEND_EXCEPTION;
        }
        match self.tx.try_send(packet) {
            Ok(()) => RetCode::OK,
            Err(TrySendError::Full(packet)) => {
                let drops = self.drops.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(SEND_DROPS_TOTAL).increment(1);
                warn!(total_drops = drops, packet = %packet.summary(), "outbound queue full, packet dropped");
                RetCode::ILLEGAL_BUFFER
            }
            Err(TrySendError::Closed(_)) => RetCode::SESSION_CLOSED,
        }
    }

    /// Close the runner. Idempotent; returns true on the first call.
    ///
    /// See the type-level close policy for what happens to queued
    /// packets.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Best-effort: a full queue or a gone writer loses the frame; the
        // embedding layer also observes closure via `is_closed`.
        if let Err(e) = self.tx.try_send(Packet::close_normal()) {
            debug!(error = %e, "close frame not queued");
        }
        true
    }

    /// Whether the runner has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record a transport write failure. Subsequent sends fail with
    /// `SEND_EXCEPTION` until the connection is torn down. Called by the
    /// writer side.
    pub fn report_fault(&self) {
        self.faulted.store(true, Ordering::Release);
    }

    /// Lifetime count of packets dropped on a full queue.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("closed", &self.is_closed())
            .field("drops", &self.drop_count())
            .finish()
    }
}
