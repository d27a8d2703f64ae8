//! Event persistence: the live store, its schema, and backups.

mod backup;
mod event_store;
pub mod schema;

pub use backup::{BackupCoordinator, BackupMetadata, BackupReport};
pub use event_store::{DEFAULT_BACKUP_RETRY_PAUSE, EventStore};
