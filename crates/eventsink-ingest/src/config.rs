//! Daemon configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use eventsink_core::{DEFAULT_BEACON_PORT, EVENT_SOURCE_TAG};

/// Configuration for the ingestion daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Numeric identifier of this store. Recorded in backup metadata.
    pub store_id: u32,

    /// Maximum number of events to retain. `None` disables the reaper.
    pub retention_cap: Option<u64>,

    /// Directory holding the live store.
    pub data_dir: PathBuf,

    /// Directory backups are written to.
    pub backup_dir: PathBuf,

    /// Address the discovery socket binds to.
    pub discovery_addr: SocketAddr,

    /// Beacon tag that identifies event publishers.
    pub beacon_filter: String,

    /// How often the reaper checks the retention cap.
    pub reap_interval: Duration,

    /// Pause between backup attempts while the store is busy.
    pub backup_retry_pause: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_id: 0,
            retention_cap: None,
            data_dir: PathBuf::from("./data"),
            backup_dir: PathBuf::from("./backup"),
            discovery_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_BEACON_PORT)),
            beacon_filter: EVENT_SOURCE_TAG.to_string(),
            reap_interval: Duration::from_secs(10),
            backup_retry_pause: Duration::from_millis(250),
        }
    }
}

impl DaemonConfig {
    /// Path of the live store file: `<data_dir>/events-<store_id>.db`.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("events-{}.db", self.store_id))
    }
}
