//! Process-wide ingestion and retention counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the ingestion thread and the reaper.
///
/// `processed` is only advanced by the ingestion loop and `lost` only by the
/// reaper; a successful backup settles the `lost` events it recorded.
#[derive(Debug, Default)]
pub struct RetentionCounters {
    processed: AtomicU64,
    lost: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub lost: u64,
}

impl RetentionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one persisted event. Returns the new total.
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count events removed by retention. Returns the new total.
    pub fn record_lost(&self, count: u64) -> u64 {
        self.lost.fetch_add(count, Ordering::SeqCst) + count
    }

    /// Subtract `count` lost events that a backup has accounted for.
    ///
    /// Losses recorded after the backup read the counter are kept.
    pub fn settle_lost(&self, count: u64) {
        let _ = self
            .lost
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |lost| {
                Some(lost.saturating_sub(count))
            });
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed(),
            lost: self.lost(),
        }
    }
}
