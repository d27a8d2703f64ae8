//! The daemon: one owner for every component.
//!
//! `Daemon` wires the store, the ingestion loop, the retention reaper and
//! the backup coordinator together, drives the loop on the current task and
//! tears everything down in order when shutdown is requested.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::control::ControlHandle;
use crate::counters::RetentionCounters;
use crate::ingest::{IngestionLoop, TurnStats};
use crate::peer::{Connector, SubscriptionPool, TcpConnector};
use crate::retention::{ReapOutcome, RetentionReaper, reap_once};
use crate::shutdown::{ShutdownCoordinator, ShutdownSummary};
use crate::store::{BackupCoordinator, BackupReport, EventStore};
use crate::Result;

/// A running event sink.
pub struct Daemon<C: Connector = TcpConnector> {
    config: DaemonConfig,
    store: Arc<EventStore>,
    counters: Arc<RetentionCounters>,
    ingest: IngestionLoop<C>,
    reaper: Option<RetentionReaper>,
    backup: BackupCoordinator,
    shutdown: ShutdownCoordinator,
}

impl Daemon<TcpConnector> {
    /// Open the store, bind discovery and start the reaper.
    pub async fn start(config: DaemonConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector).await
    }
}

impl<C: Connector> Daemon<C> {
    /// Like [`Daemon::start`] with a custom peer connector.
    pub async fn with_connector(config: DaemonConfig, connector: C) -> Result<Self> {
        let store_path = config.store_path();
        let store = Arc::new(
            EventStore::open(&store_path)?.with_backup_retry_pause(config.backup_retry_pause),
        );
        let counters = Arc::new(RetentionCounters::new());

        let ingest = IngestionLoop::new(
            config.discovery_addr,
            &config.beacon_filter,
            connector,
            Arc::clone(&store),
            Arc::clone(&counters),
        )
        .await?;

        let reaper = match config.retention_cap {
            Some(cap) => Some(RetentionReaper::spawn(
                Arc::clone(&store),
                Arc::clone(&counters),
                cap,
                config.reap_interval,
            )?),
            None => None,
        };

        let backup = BackupCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&counters),
            &config.backup_dir,
            config.store_id,
        );

        info!(
            store_id = config.store_id,
            retention_cap = ?config.retention_cap,
            "Daemon started with store {}",
            store_path.display()
        );

        Ok(Self {
            config,
            store,
            counters,
            ingest,
            reaper,
            backup,
            shutdown: ShutdownCoordinator::new(),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Handle for requesting shutdown or a backup from other threads.
    pub fn control(&self) -> ControlHandle {
        self.ingest.control().clone()
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn counters(&self) -> &RetentionCounters {
        &self.counters
    }

    pub fn peers(&self) -> &SubscriptionPool<C> {
        self.ingest.pool()
    }

    /// Address the discovery socket is bound to.
    pub fn discovery_addr(&self) -> Result<SocketAddr> {
        self.ingest.discovery_addr()
    }

    /// Run until shutdown is requested, then tear down.
    ///
    /// Returns the final summary, or `None` if the daemon had already been
    /// shut down. A turn failure still tears down before it is returned.
    pub async fn run(&mut self) -> Result<Option<ShutdownSummary>> {
        let outcome = self.drive().await;
        let summary = self.shutdown();
        outcome.map(|()| summary)
    }

    async fn drive(&mut self) -> Result<()> {
        while !self.shutdown.is_started() && !self.ingest.control().shutdown_requested() {
            self.run_once(None).await?;
        }
        Ok(())
    }

    /// One ingestion turn, followed by a backup if one was requested.
    pub async fn run_once(&mut self, timeout: Option<Duration>) -> Result<TurnStats> {
        if self.shutdown.is_started() {
            return Ok(TurnStats::default());
        }

        let stats = self.ingest.turn(timeout).await?;

        if self.ingest.control().take_backup_request() {
            if let Err(e) = self.backup_now() {
                error!("Backup failed: {}", e);
            }
        }

        Ok(stats)
    }

    /// Take a backup on the calling thread.
    ///
    /// Blocks until the copy finishes; ingestion pauses meanwhile.
    pub fn backup_now(&self) -> Result<BackupReport> {
        self.backup.run()
    }

    /// Run one retention cycle now. Returns `None` when no cap is configured.
    pub fn reap_now(&self) -> Result<Option<ReapOutcome>> {
        match self.config.retention_cap {
            Some(cap) => reap_once(&self.store, &self.counters, cap).map(Some),
            None => Ok(None),
        }
    }

    /// Stop everything in order and log the final summary.
    ///
    /// Only the first call does anything; later calls return `None`.
    pub fn shutdown(&mut self) -> Option<ShutdownSummary> {
        if !self.shutdown.begin() {
            return None;
        }

        info!("Shutting down");
        self.ingest.control().request_shutdown();

        if let Some(mut reaper) = self.reaper.take() {
            reaper.stop();
        }

        let peers_closed = self.ingest.close();

        let remaining = match self.store.count() {
            Ok(count) => Some(count),
            Err(e) => {
                error!("Failed to count remaining events: {}", e);
                None
            }
        };
        if let Err(e) = self.store.close() {
            error!("Failed to close event store: {}", e);
        }

        let counters = self.counters.snapshot();
        let summary = ShutdownSummary {
            processed: counters.processed,
            lost: counters.lost,
            remaining,
            peers_closed,
        };
        summary.log();

        Some(summary)
    }
}

impl<C: Connector> Drop for Daemon<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{BeaconAnnouncer, ConnectFuture, FeedPublisher};
    use eventsink_core::{Beacon, EVENT_SOURCE_TAG};
    use std::time::Instant;
    use tempfile::TempDir;

    fn config(tmp: &TempDir, retention_cap: Option<u64>) -> DaemonConfig {
        DaemonConfig {
            store_id: 1,
            retention_cap,
            data_dir: tmp.path().join("data"),
            backup_dir: tmp.path().join("backup"),
            discovery_addr: "127.0.0.1:0".parse().unwrap(),
            // Long interval so tests drive retention by hand
            reap_interval: Duration::from_secs(3600),
            backup_retry_pause: Duration::from_millis(10),
            ..DaemonConfig::default()
        }
    }

    async fn drive_until<C: Connector>(
        daemon: &mut Daemon<C>,
        mut done: impl FnMut(&Daemon<C>) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(daemon) {
            assert!(Instant::now() < deadline, "timed out driving daemon");
            daemon.run_once(Some(Duration::from_millis(20))).await.unwrap();
        }
    }

    fn announce<C: Connector>(daemon: &Daemon<C>, endpoint: &str) {
        let beacon = Beacon::new(EVENT_SOURCE_TAG, endpoint);
        BeaconAnnouncer::new(&beacon, daemon.discovery_addr().unwrap())
            .unwrap()
            .announce()
            .unwrap();
    }

    /// Keep the daemon turning until the publisher has accepted it.
    async fn subscribe<C: Connector>(daemon: &mut Daemon<C>, publisher: &mut FeedPublisher) {
        announce(daemon, &publisher.endpoint().unwrap());
        drive_until(daemon, |_| {
            publisher.accept_pending().unwrap();
            publisher.subscriber_count() == 1
        })
        .await;
    }

    #[tokio::test]
    async fn test_end_to_end_retention_and_backup() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::start(config(&tmp, Some(3))).await.unwrap();
        let mut publisher = FeedPublisher::bind("127.0.0.1:0").unwrap();
        subscribe(&mut daemon, &mut publisher).await;

        for i in 1..=5 {
            publisher.publish(format!("reading-{}", i).as_bytes()).unwrap();
        }
        drive_until(&mut daemon, |d| d.counters().processed() == 5).await;

        let outcome = daemon.reap_now().unwrap().unwrap();
        assert_eq!(outcome.removed, 2);
        assert_eq!(daemon.store().count().unwrap(), 3);
        assert_eq!(daemon.counters().lost(), 2);

        let report = daemon.backup_now().unwrap();
        assert_eq!(report.metadata.first_event, Some(3));
        assert_eq!(report.metadata.last_event, Some(5));
        assert_eq!(report.metadata.lost_events, 2);
        assert_eq!(report.metadata.store_id, 1);
        assert_eq!(daemon.counters().lost(), 0);
        assert!(report.path.starts_with(tmp.path().join("backup")));

        let summary = daemon.shutdown().unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.lost, 0);
        assert_eq!(summary.remaining, Some(3));
        assert_eq!(summary.peers_closed, 1);
    }

    #[tokio::test]
    async fn test_repeated_beacons_subscribe_once() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::start(config(&tmp, None)).await.unwrap();
        let publisher = FeedPublisher::bind("127.0.0.1:0").unwrap();
        let endpoint = publisher.endpoint().unwrap();

        for _ in 0..3 {
            announce(&daemon, &endpoint);
        }
        drive_until(&mut daemon, |d| d.peers().len() == 1).await;
        for _ in 0..5 {
            daemon.run_once(Some(Duration::from_millis(20))).await.unwrap();
        }

        assert_eq!(daemon.peers().len(), 1);
        assert_eq!(daemon.peers().directory().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_hangup_forgets_endpoint() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::start(config(&tmp, None)).await.unwrap();
        let mut publisher = FeedPublisher::bind("127.0.0.1:0").unwrap();
        let endpoint = publisher.endpoint().unwrap();
        subscribe(&mut daemon, &mut publisher).await;

        publisher.publish(b"last words").unwrap();
        drop(publisher);
        drive_until(&mut daemon, |d| d.peers().is_empty()).await;

        assert!(!daemon.peers().directory().contains(&endpoint));
        assert_eq!(daemon.store().count().unwrap(), 1);
    }

    struct UnreachableConnector;

    impl Connector for UnreachableConnector {
        fn connect(&self, _addr: SocketAddr) -> ConnectFuture {
            Box::pin(async { Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)) })
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::with_connector(config(&tmp, None), UnreachableConnector)
            .await
            .unwrap();

        announce(&daemon, "tcp://127.0.0.1:9");
        let mut beacons = 0;
        let mut removed = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while removed == 0 {
            assert!(Instant::now() < deadline, "peer was never dropped");
            let stats = daemon.run_once(Some(Duration::from_millis(20))).await.unwrap();
            beacons += stats.beacons;
            removed += stats.peers_removed;
        }

        assert_eq!(beacons, 1);
        assert!(daemon.peers().is_empty());
        assert!(daemon.peers().directory().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::start(config(&tmp, Some(10))).await.unwrap();
        daemon.store().append(b"kept").unwrap();

        let first = daemon.shutdown();
        assert_eq!(first.map(|s| s.remaining), Some(Some(1)));
        assert!(daemon.shutdown().is_none());
        assert!(daemon.run().await.unwrap().is_none());
        assert!(daemon.store().is_closed());
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown_request() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::start(config(&tmp, Some(10))).await.unwrap();
        let control = daemon.control();

        let requester = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            control.request_shutdown();
        });

        let summary = daemon.run().await.unwrap();
        requester.join().unwrap();
        assert_eq!(summary.map(|s| s.processed), Some(0));
    }

    #[tokio::test]
    async fn test_backup_request_runs_on_next_turn() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = Daemon::start(config(&tmp, None)).await.unwrap();
        daemon.store().append(b"x").unwrap();

        daemon.control().request_backup();
        daemon.run_once(Some(Duration::from_secs(5))).await.unwrap();

        let backups: Vec<_> = std::fs::read_dir(tmp.path().join("backup"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "db"))
            .collect();
        assert_eq!(backups.len(), 1);
    }
}
