//! SQLite-backed append-only event store.
//!
//! The `EventStore` is responsible for:
//! - Appending frames as events with store-assigned, strictly increasing ids
//! - Point-in-time reads (count, id range, single events)
//! - Deleting the oldest events on behalf of the retention reaper
//! - Producing consistent copies of itself for backups
//!
//! It is the only object shared between the ingestion thread and the reaper
//! thread. Every entry point takes the internal connection lock, so appends
//! and deletions never interleave on the same connection.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use eventsink_core::{Event, EventId};
use parking_lot::Mutex;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::backup::BackupMetadata;
use super::schema;
use crate::{Error, Result};

/// Default pause between backup steps while the source is busy or locked.
pub const DEFAULT_BACKUP_RETRY_PAUSE: Duration = Duration::from_millis(250);

/// Pages copied per backup step.
const PAGES_PER_STEP: i32 = 1024;

/// Append-only event store.
pub struct EventStore {
    /// Path of the database file (`None` for in-memory stores).
    path: Option<PathBuf>,
    /// SQLite connection (protected by mutex for thread safety, `None` once closed).
    conn: Mutex<Option<Connection>>,
    /// Pause between backup attempts while the source is busy.
    backup_retry_pause: Duration,
}

impl EventStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL lets backup readers proceed while the reaper writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        info!("Event store opened at {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(Some(conn)),
            backup_retry_pause: DEFAULT_BACKUP_RETRY_PAUSE,
        })
    }

    /// Open an existing store or backup without modifying it.
    ///
    /// No pragmas are set and no schema is created; every write fails.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Database(format!("Failed to open {} read-only: {}", path.display(), e)))?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(Some(conn)),
            backup_retry_pause: DEFAULT_BACKUP_RETRY_PAUSE,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            path: None,
            conn: Mutex::new(Some(conn)),
            backup_retry_pause: DEFAULT_BACKUP_RETRY_PAUSE,
        })
    }

    /// Set the pause between backup attempts while the source is busy.
    pub fn with_backup_retry_pause(mut self, pause: Duration) -> Self {
        self.backup_retry_pause = pause;
        self
    }

    /// Path of the database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the open connection.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(Error::Closed)?;
        f(conn)
    }

    /// Append a payload as a new event and return its id.
    ///
    /// UTF-8 payloads are stored as TEXT, anything else as a BLOB.
    pub fn append(&self, payload: &[u8]) -> Result<EventId> {
        self.with_conn(|conn| {
            let inserted = match std::str::from_utf8(payload) {
                Ok(text) => conn.execute("INSERT INTO events (event) VALUES (?)", [text]),
                Err(_) => conn.execute("INSERT INTO events (event) VALUES (?)", [payload]),
            };
            inserted.map_err(|e| Error::Write(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Number of events currently stored.
    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .map_err(|e| Error::Query(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Lowest stored event id, or `None` when empty.
    pub fn min_id(&self) -> Result<Option<EventId>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MIN(id) FROM events", [], |row| row.get(0))
                .map_err(|e| Error::Query(e.to_string()))
        })
    }

    /// Highest stored event id, or `None` when empty.
    pub fn max_id(&self) -> Result<Option<EventId>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(id) FROM events", [], |row| row.get(0))
                .map_err(|e| Error::Query(e.to_string()))
        })
    }

    /// Fetch a single event by id.
    pub fn get(&self, id: EventId) -> Result<Option<Event>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT id, event FROM events WHERE id = ?", [id], |row| {
                let payload = match row.get_ref(1)? {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
                    _ => Vec::new(),
                };
                Ok(Event {
                    id: row.get(0)?,
                    payload,
                })
            })
            .optional()
            .map_err(|e| Error::Query(e.to_string()))
        })
    }

    /// Delete the `n` oldest events (lowest ids). Returns the number removed.
    pub fn delete_oldest(&self, n: u64) -> Result<u64> {
        if n == 0 {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM events WHERE id IN (
                        SELECT id FROM events ORDER BY id ASC LIMIT ?
                     )",
                    [n as i64],
                )
                .map_err(|e| Error::Delete(e.to_string()))?;
            Ok(removed as u64)
        })
    }

    /// Reclaim space left behind by deleted rows.
    pub fn compact(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("VACUUM")
                .map_err(|e| Error::Backup(format!("Failed to compact store: {}", e)))
        })
    }

    /// Write a consistent copy of the store to `target`.
    ///
    /// The live store is compacted first. File-backed stores are copied from
    /// a dedicated read-only connection, so the reaper can keep deleting
    /// while the copy runs. While the source reports busy or locked the copy
    /// sleeps for the retry pause and tries again, without limit.
    pub fn snapshot_to(&self, target: &Path) -> Result<()> {
        self.compact()?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let mut dst = Connection::open(target).map_err(|e| {
            Error::Backup(format!("Failed to open {}: {}", target.display(), e))
        })?;
        // A locked target is retried by `copy_database` at the configured pause
        dst.busy_timeout(Duration::ZERO)
            .map_err(|e| Error::Backup(format!("Failed to configure {}: {}", target.display(), e)))?;

        match &self.path {
            Some(path) => {
                if self.is_closed() {
                    return Err(Error::Closed);
                }
                let src = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(|e| Error::Backup(format!("Failed to open backup source: {}", e)))?;
                copy_database(&src, &mut dst, self.backup_retry_pause)
            }
            None => self.with_conn(|conn| copy_database(conn, &mut dst, self.backup_retry_pause)),
        }
    }

    /// Record a backup metadata row.
    ///
    /// Only ever called on backup copies; creates the `meta` table on first use.
    pub fn record_backup_metadata(&self, metadata: &BackupMetadata) -> Result<()> {
        self.with_conn(|conn| {
            schema::init_meta_schema(conn)
                .map_err(|e| Error::Backup(format!("Failed to create meta table: {}", e)))?;

            conn.execute(
                "INSERT INTO meta (timestamp, store_id, first_event, last_event, lost_events)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    metadata.timestamp.timestamp(),
                    metadata.store_id,
                    metadata.first_event,
                    metadata.last_event,
                    metadata.lost_events as i64,
                ],
            )
            .map_err(|e| Error::Backup(format!("Failed to write backup metadata: {}", e)))?;

            Ok(())
        })
    }

    /// Read all backup metadata rows (empty for live stores).
    pub fn backup_metadata(&self) -> Result<Vec<BackupMetadata>> {
        self.with_conn(|conn| {
            if !schema::has_meta_table(conn).map_err(|e| Error::Query(e.to_string()))? {
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare(
                    "SELECT timestamp, store_id, first_event, last_event, lost_events
                     FROM meta ORDER BY rowid",
                )
                .map_err(|e| Error::Query(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let timestamp: i64 = row.get(0)?;
                    let lost_events: i64 = row.get(4)?;
                    Ok(BackupMetadata {
                        timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_default(),
                        store_id: row.get(1)?,
                        first_event: row.get(2)?,
                        last_event: row.get(3)?,
                        lost_events: lost_events as u64,
                    })
                })
                .map_err(|e| Error::Query(e.to_string()))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Query(e.to_string()))?;

            Ok(rows)
        })
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Close the underlying connection. Later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => {
                conn.close()
                    .map_err(|(_, e)| Error::Database(format!("Failed to close SQLite: {}", e)))?;
                debug!("Event store closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Copy `src` into `dst` with the online backup API.
fn copy_database(src: &Connection, dst: &mut Connection, retry_pause: Duration) -> Result<()> {
    let backup = Backup::new(src, dst)
        .map_err(|e| Error::Backup(format!("Failed to start backup: {}", e)))?;

    loop {
        let step = backup
            .step(PAGES_PER_STEP)
            .map_err(|e| Error::Backup(format!("Backup step failed: {}", e)))?;

        match step {
            StepResult::Done => return Ok(()),
            StepResult::More => {}
            StepResult::Busy | StepResult::Locked => {
                debug!("Backup busy, retrying in {:?}", retry_pause);
                thread::sleep(retry_pause);
            }
            other => {
                return Err(Error::Backup(format!(
                    "Unexpected backup step result: {:?}",
                    other
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_with(n: usize) -> EventStore {
        let store = EventStore::open_in_memory().unwrap();
        for i in 0..n {
            store.append(format!("event-{}", i).as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let store = EventStore::open_in_memory().unwrap();
        let ids: Vec<EventId> = (0..10)
            .map(|i| store.append(format!("e{}", i).as_bytes()).unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.count().unwrap(), 10);
        assert_eq!(store.min_id().unwrap(), Some(ids[0]));
        assert_eq!(store.max_id().unwrap(), Some(ids[9]));
    }

    #[test]
    fn test_empty_store_has_no_id_range() {
        let store = EventStore::open_in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.min_id().unwrap(), None);
        assert_eq!(store.max_id().unwrap(), None);
    }

    #[test]
    fn test_get_text_and_binary_payloads() {
        let store = EventStore::open_in_memory().unwrap();
        let text_id = store.append(b"temperature=21").unwrap();
        let blob_id = store.append(&[0x00, 0xff, 0x10]).unwrap();

        assert_eq!(store.get(text_id).unwrap().unwrap().payload, b"temperature=21");
        assert_eq!(store.get(blob_id).unwrap().unwrap().payload, vec![0x00, 0xff, 0x10]);
        assert!(store.get(blob_id + 100).unwrap().is_none());
    }

    #[test]
    fn test_delete_oldest_removes_prefix() {
        let store = store_with(5);
        let removed = store.delete_oldest(2).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.min_id().unwrap(), Some(3));
        assert_eq!(store.max_id().unwrap(), Some(5));
    }

    #[test]
    fn test_delete_oldest_more_than_stored() {
        let store = store_with(2);
        assert_eq!(store.delete_oldest(10).unwrap(), 2);
        assert_eq!(store.delete_oldest(0).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_ids_not_reused_after_deleting_newest() {
        let store = store_with(3);
        store.delete_oldest(3).unwrap();
        let id = store.append(b"after").unwrap();
        assert_eq!(id, 4);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = store_with(1);
        store.close().unwrap();
        store.close().unwrap(); // Second close is a no-op

        assert!(store.is_closed());
        assert!(matches!(store.append(b"late"), Err(Error::Closed)));
        assert!(matches!(store.count(), Err(Error::Closed)));
    }

    #[test]
    fn test_snapshot_to_file_copy() {
        let tmp = TempDir::new().unwrap();
        let store = EventStore::open(tmp.path().join("events-1.db")).unwrap();
        for i in 0..5 {
            store.append(format!("e{}", i).as_bytes()).unwrap();
        }
        store.delete_oldest(2).unwrap();

        let target = tmp.path().join("backup").join("copy.db");
        store.snapshot_to(&target).unwrap();

        let copy = EventStore::open(&target).unwrap();
        assert_eq!(copy.count().unwrap(), 3);
        assert_eq!(copy.min_id().unwrap(), Some(3));
        assert_eq!(copy.max_id().unwrap(), Some(5));

        // Live store untouched
        assert_eq!(store.count().unwrap(), 3);
        assert!(store.backup_metadata().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_in_memory_store() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(4);
        let target = tmp.path().join("mem-copy.db");
        store.snapshot_to(&target).unwrap();

        let copy = EventStore::open(&target).unwrap();
        assert_eq!(copy.count().unwrap(), 4);
    }

    #[test]
    fn test_snapshot_while_appending_from_another_thread() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(EventStore::open(tmp.path().join("events-2.db")).unwrap());
        for i in 0..100 {
            store.append(format!("seed-{}", i).as_bytes()).unwrap();
        }

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    store.append(format!("live-{}", i).as_bytes()).unwrap();
                }
            })
        };

        let target = tmp.path().join("concurrent.db");
        store.snapshot_to(&target).unwrap();
        writer.join().unwrap();

        let copy = EventStore::open(&target).unwrap();
        let count = copy.count().unwrap();
        assert!((100..=300).contains(&count));
        // The copy is a contiguous prefix of the live store
        assert_eq!(copy.min_id().unwrap(), Some(1));
        assert_eq!(copy.max_id().unwrap(), Some(count as EventId));
        assert_eq!(store.count().unwrap(), 300);
    }

    #[test]
    fn test_snapshot_waits_for_locked_target() {
        let tmp = TempDir::new().unwrap();
        let store = EventStore::open(tmp.path().join("events-3.db"))
            .unwrap()
            .with_backup_retry_pause(Duration::from_millis(10));
        for i in 0..10 {
            store.append(format!("e{}", i).as_bytes()).unwrap();
        }

        // Another connection holds a write transaction on the target
        let target = tmp.path().join("locked.db");
        let (locked_tx, locked_rx) = crossbeam_channel::bounded(1);
        let hold = Duration::from_millis(300);
        let holder = {
            let target = target.clone();
            thread::spawn(move || {
                let conn = Connection::open(&target).unwrap();
                conn.execute_batch("CREATE TABLE IF NOT EXISTS t (x); BEGIN IMMEDIATE; INSERT INTO t VALUES (1);")
                    .unwrap();
                locked_tx.send(()).unwrap();
                thread::sleep(hold);
                conn.execute_batch("COMMIT").unwrap();
            })
        };
        locked_rx.recv().unwrap();

        let started = std::time::Instant::now();
        store.snapshot_to(&target).unwrap();
        let waited = started.elapsed();
        holder.join().unwrap();

        assert!(waited >= Duration::from_millis(200), "snapshot did not wait: {:?}", waited);
        let copy = EventStore::open(&target).unwrap();
        assert_eq!(copy.count().unwrap(), 10);
        assert_eq!(copy.max_id().unwrap(), Some(10));
    }

    #[test]
    fn test_open_read_only_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plain.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE events (id INTEGER PRIMARY KEY AUTOINCREMENT, event TEXT);
                 INSERT INTO events (event) VALUES ('a'), ('b');",
            )
            .unwrap();
        }
        let before = fs::read(&path).unwrap();

        let store = EventStore::open_read_only(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.max_id().unwrap(), Some(2));
        assert!(store.backup_metadata().unwrap().is_empty());
        assert!(store.append(b"c").is_err());
        store.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!tmp.path().join("plain.db-wal").exists());

        let missing = tmp.path().join("nested/missing.db");
        assert!(EventStore::open_read_only(&missing).is_err());
        assert!(!tmp.path().join("nested").exists());
    }

    #[test]
    fn test_backup_metadata_roundtrip() {
        let store = store_with(2);
        let metadata = BackupMetadata {
            timestamp: DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap(),
            store_id: 7,
            first_event: Some(1),
            last_event: Some(2),
            lost_events: 4,
        };
        store.record_backup_metadata(&metadata).unwrap();

        let rows = store.backup_metadata().unwrap();
        assert_eq!(rows, vec![metadata]);
    }
}
