//! Prometheus metrics helpers for eventsink.
//!
//! # Usage
//!
//! ```rust,ignore
//! use eventsink_core::metrics::init_metrics;
//!
//! // Install the recorder and serve /metrics on port 9090
//! init_metrics(9090)?;
//!
//! metrics::counter!("eventsink_events_processed_total").increment(1);
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `eventsink_`
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - No per-peer labels; peer counts are gauges

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP listener.
///
/// The exporter runs on its own background thread, so this can be called
/// from synchronous code. Fails if a recorder is already installed or the
/// port cannot be bound.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics();

    tracing::info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Try to install a recorder without an HTTP listener.
///
/// Returns `None` if a recorder is already installed. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Register descriptions for the daemon's metrics.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Ingestion
    // =========================================================================

    describe_counter!(
        "eventsink_events_processed_total",
        "Events received from peers and appended to the store"
    );
    describe_counter!(
        "eventsink_append_errors_total",
        "Frames that could not be appended to the store"
    );
    describe_counter!(
        "eventsink_beacons_total",
        "Discovery beacons accepted (label: outcome)"
    );
    describe_gauge!("eventsink_peers_connected", "Live peer subscriptions");
    describe_counter!(
        "eventsink_peer_errors_total",
        "Peer subscriptions torn down after an error"
    );

    // =========================================================================
    // Retention
    // =========================================================================

    describe_counter!(
        "eventsink_events_lost_total",
        "Events deleted by the retention reaper"
    );
    describe_gauge!("eventsink_store_events", "Rows in the live store after the last reap");

    // =========================================================================
    // Backup
    // =========================================================================

    describe_counter!("eventsink_backups_total", "Successful backups");
    describe_counter!("eventsink_backup_errors_total", "Failed backups");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_idempotent() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
