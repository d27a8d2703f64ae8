//! Eventsink ingestion daemon.
//!
//! Listens for `EVENT_SRC:<endpoint>` beacons, subscribes to every announced
//! feed and stores each event in `<data-dir>/events-<store_id>.db`.
//!
//! # Usage
//!
//! ```bash
//! # Store 7, unbounded
//! eventsink 7
//!
//! # Store 7, keep at most 100000 events
//! eventsink 7 100000
//!
//! # Custom paths and discovery port
//! eventsink 7 100000 \
//!     --data-dir /var/lib/eventsink \
//!     --backup-dir /var/backups/eventsink \
//!     --beacon-port 6000
//! ```
//!
//! # Signals
//!
//! - SIGINT / SIGTERM / SIGHUP: graceful shutdown, logs a final summary
//! - SIGUSR1: write a backup to `--backup-dir`

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use eventsink_core::metrics::init_metrics;
use eventsink_core::{DEFAULT_BEACON_PORT, EVENT_SOURCE_TAG};
use eventsink_ingest::{Daemon, DaemonConfig, install_signal_handlers};
use tracing_subscriber::EnvFilter;

/// Eventsink ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "eventsink")]
#[command(about = "Discover event publishers and persist their feeds to SQLite")]
#[command(version)]
struct Args {
    /// Numeric id of this store
    #[arg(env = "EVENTSINK_STORE_ID")]
    store_id: u32,

    /// Maximum number of events to keep (unbounded when omitted)
    #[arg(env = "EVENTSINK_RETENTION_CAP")]
    retention_cap: Option<u64>,

    /// Directory holding the live store
    #[arg(long, env = "EVENTSINK_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Directory backups are written to
    #[arg(long, env = "EVENTSINK_BACKUP_DIR", default_value = "./backup")]
    backup_dir: PathBuf,

    /// UDP port to listen for beacons on
    #[arg(long, env = "EVENTSINK_BEACON_PORT", default_value_t = DEFAULT_BEACON_PORT)]
    beacon_port: u16,

    /// Beacon tag identifying event publishers
    #[arg(long, env = "EVENTSINK_BEACON_FILTER", default_value = EVENT_SOURCE_TAG)]
    beacon_filter: String,

    /// Seconds between retention checks
    #[arg(long, env = "EVENTSINK_REAP_INTERVAL_SECS", default_value = "10")]
    reap_interval_secs: u64,

    /// Milliseconds to wait before retrying a busy backup
    #[arg(long, env = "EVENTSINK_BACKUP_RETRY_MS", default_value = "250")]
    backup_retry_ms: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "EVENTSINK_METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

impl Args {
    fn to_config(&self) -> DaemonConfig {
        DaemonConfig {
            store_id: self.store_id,
            retention_cap: self.retention_cap,
            data_dir: self.data_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            discovery_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.beacon_port)),
            beacon_filter: self.beacon_filter.clone(),
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
            backup_retry_pause: Duration::from_millis(self.backup_retry_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("eventsink_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Eventsink daemon starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        if let Err(e) = init_metrics(args.metrics_port) {
            tracing::warn!("Metrics disabled: {}", e);
        }
    }

    let config = args.to_config();
    let mut daemon = Daemon::start(config.clone()).await.with_context(|| {
        format!(
            "Failed to start daemon (store {}, discovery {})",
            config.store_path().display(),
            config.discovery_addr
        )
    })?;

    install_signal_handlers(&daemon.control()).context("Failed to install signal handlers")?;

    daemon.run().await.context("Ingestion loop failed")?;

    Ok(())
}
