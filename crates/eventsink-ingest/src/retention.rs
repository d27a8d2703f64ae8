//! Retention: keep the live store at or below a row cap.
//!
//! A background thread wakes every `reap_interval`, counts the store and
//! deletes the oldest rows above the cap. Every removed row is added to the
//! `lost` counter, which the next backup records and settles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info};

use crate::counters::RetentionCounters;
use crate::store::EventStore;
use crate::Result;

/// Outcome of one retention cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Rows in the store before the cycle.
    pub count_before: u64,
    /// Rows actually deleted.
    pub removed: u64,
}

/// Run one retention cycle against `store`.
///
/// Deletes the oldest `count - cap` rows when the store is over the cap and
/// adds the number removed to `lost`. On error nothing is counted.
pub fn reap_once(
    store: &EventStore,
    counters: &RetentionCounters,
    cap: u64,
) -> Result<ReapOutcome> {
    let count_before = store.count()?;
    let mut removed = 0;

    if count_before > cap {
        removed = store.delete_oldest(count_before - cap)?;
        let lost = counters.record_lost(removed);
        metrics::counter!("eventsink_events_lost_total").increment(removed);
        debug!(removed, lost, "Retention removed oldest events");
    }

    metrics::gauge!("eventsink_store_events").set((count_before - removed) as f64);

    Ok(ReapOutcome {
        count_before,
        removed,
    })
}

/// Handle to the background retention thread.
pub struct RetentionReaper {
    cancelled: Arc<AtomicBool>,
    wake: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RetentionReaper {
    /// Start the reaper thread.
    pub fn spawn(
        store: Arc<EventStore>,
        counters: Arc<RetentionCounters>,
        cap: u64,
        interval: Duration,
    ) -> Result<Self> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (wake, sleeper) = bounded::<()>(1);

        let thread_cancelled = Arc::clone(&cancelled);
        let handle = thread::Builder::new()
            .name("retention-reaper".to_string())
            .spawn(move || {
                info!(cap, ?interval, "Retention reaper started");

                while !thread_cancelled.load(Ordering::SeqCst) {
                    match sleeper.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Woken by stop() or the handle was dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if thread_cancelled.load(Ordering::SeqCst) {
                        break;
                    }

                    if let Err(e) = reap_once(&store, &counters, cap) {
                        error!("Retention cycle failed: {}", e);
                    }
                }

                debug!("Retention reaper exiting");
            })?;

        Ok(Self {
            cancelled,
            wake,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit. Later calls are no-ops.
    ///
    /// A cycle already in progress finishes first.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.wake.try_send(());

        if handle.join().is_err() {
            error!("Retention reaper thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RetentionReaper {
    fn drop(&mut self) {
        self.stop();
    }
}
