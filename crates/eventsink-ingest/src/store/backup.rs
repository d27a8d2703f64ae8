//! Point-in-time backups of the live store.
//!
//! A backup is a full SQLite copy of the live store plus one `meta` row
//! describing it: when it was taken, which store it came from, the id range
//! it contains, and how many events the reaper dropped since the previous
//! backup. Once the row is written, those dropped events are accounted for
//! and the live `lost` counter is reduced by the recorded amount.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eventsink_core::EventId;
use tracing::{info, warn};

use super::EventStore;
use crate::counters::RetentionCounters;
use crate::{Error, Result};

/// Timestamp format used in backup file names.
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// One row of the `meta` table in a backup copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// When the backup was taken (stored as unix seconds).
    pub timestamp: DateTime<Utc>,
    /// Store the backup was taken from.
    pub store_id: u32,
    /// Lowest event id in the copy.
    pub first_event: Option<EventId>,
    /// Highest event id in the copy.
    pub last_event: Option<EventId>,
    /// Events deleted by retention since the previous backup.
    pub lost_events: u64,
}

/// Result of a successful backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub path: PathBuf,
    pub metadata: BackupMetadata,
}

/// Takes backups of a live store and settles the lost-event counter.
pub struct BackupCoordinator {
    store: Arc<EventStore>,
    counters: Arc<RetentionCounters>,
    backup_dir: PathBuf,
    store_id: u32,
    stem: String,
}

impl BackupCoordinator {
    pub fn new(
        store: Arc<EventStore>,
        counters: Arc<RetentionCounters>,
        backup_dir: impl Into<PathBuf>,
        store_id: u32,
    ) -> Self {
        let stem = store
            .path()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("events-{}", store_id));

        Self {
            store,
            counters,
            backup_dir: backup_dir.into(),
            store_id,
            stem,
        }
    }

    /// Path a backup taken at `at` is written to.
    pub fn backup_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.backup_dir.join(format!(
            "{}-{}.db",
            self.stem,
            at.format(BACKUP_TIMESTAMP_FORMAT)
        ))
    }

    /// Take a backup now.
    pub fn run(&self) -> Result<BackupReport> {
        self.run_at(Utc::now())
    }

    /// Take a backup stamped with `at`.
    ///
    /// On failure the partial copy is removed and the live counters are left
    /// untouched.
    pub fn run_at(&self, at: DateTime<Utc>) -> Result<BackupReport> {
        let path = self.backup_path(at);

        if path.exists() {
            return Err(Error::Backup(format!(
                "Backup target {} already exists",
                path.display()
            )));
        }

        match self.write_backup(&path, at) {
            Ok(metadata) => {
                self.counters.settle_lost(metadata.lost_events);
                metrics::counter!("eventsink_backups_total").increment(1);

                info!(
                    path = %path.display(),
                    first_event = ?metadata.first_event,
                    last_event = ?metadata.last_event,
                    lost_events = metadata.lost_events,
                    "Backup complete"
                );

                Ok(BackupReport { path, metadata })
            }
            Err(e) => {
                metrics::counter!("eventsink_backup_errors_total").increment(1);
                remove_partial(&path);
                Err(e)
            }
        }
    }

    fn write_backup(&self, path: &Path, at: DateTime<Utc>) -> Result<BackupMetadata> {
        self.store.snapshot_to(path)?;

        let copy = EventStore::open(path)?;
        let metadata = BackupMetadata {
            // Whole seconds, matching what the meta table stores
            timestamp: DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at),
            store_id: self.store_id,
            first_event: copy.min_id()?,
            last_event: copy.max_id()?,
            lost_events: self.counters.lost(),
        };
        copy.record_backup_metadata(&metadata)?;
        copy.close()?;

        Ok(metadata)
    }
}

/// Remove a partially written backup and its WAL side files.
fn remove_partial(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            if let Err(e) = fs::remove_file(&candidate) {
                warn!("Failed to remove partial backup {}: {}", candidate.display(), e);
            }
        }
    }
}
