//! One-shot shutdown bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};

/// Guards the teardown sequence so it runs exactly once.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    started: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the teardown. Returns `true` for the first caller only.
    pub fn begin(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Final counters reported when the daemon stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Events appended since startup.
    pub processed: u64,
    /// Events removed by retention and not yet recorded in a backup.
    pub lost: u64,
    /// Rows left in the store, if it could still be counted.
    pub remaining: Option<u64>,
    /// Peer subscriptions closed during teardown.
    pub peers_closed: usize,
}

impl ShutdownSummary {
    pub fn log(&self) {
        tracing::info!("═══════════════════════════════════════════════════════");
        tracing::info!("SHUTDOWN COMPLETE");
        tracing::info!("═══════════════════════════════════════════════════════");
        tracing::info!("Events processed:     {}", self.processed);
        tracing::info!("Events lost:          {}", self.lost);
        match self.remaining {
            Some(remaining) => tracing::info!("Events remaining:     {}", remaining),
            None => tracing::info!("Events remaining:     unknown"),
        }
        tracing::info!("Peers closed:         {}", self.peers_closed);
    }
}
