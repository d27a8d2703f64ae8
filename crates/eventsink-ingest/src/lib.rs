//! Eventsink ingestion daemon.
//!
//! This crate discovers event publishers on the local network, subscribes to
//! each of their feeds and persists every event into a local SQLite store.
//!
//! # Modules
//!
//! - [`discovery`] - UDP beacon listener
//! - [`peer`] - Peer directory, subscription pool, and the publishing side
//! - [`ingest`] - The ingestion loop multiplexing discovery, peers and control
//! - [`store`] - Event store, schema, and backups
//! - [`retention`] - Background reaper enforcing the row cap
//! - [`daemon`] - Owns every component and the shutdown sequence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │ BeaconListener  │─────▶│SubscriptionPool │  UDP beacons → TCP subscriptions
//! └─────────────────┘      └────────┬────────┘
//!                                   │ frames
//!                                   ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │ RetentionReaper │─────▶│   EventStore    │  SQLite, shared behind a mutex
//! └─────────────────┘      └────────┬────────┘
//!                                   │ on SIGUSR1
//!                                   ▼
//!                          ┌─────────────────┐
//!                          │BackupCoordinator│  Copy + meta row, settles `lost`
//!                          └─────────────────┘
//! ```
//!
//! Each subscription is a reader task that forwards frames over one channel;
//! only the ingestion loop writes to the store, so per-peer order is kept.
//! The reaper runs on its own thread. Signal handlers only set flags and
//! wake the loop.

pub mod config;
pub mod control;
pub mod counters;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod peer;
pub mod retention;
pub mod shutdown;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use config::DaemonConfig;
pub use control::{ControlHandle, install_signal_handlers};
pub use counters::{CounterSnapshot, RetentionCounters};
pub use daemon::Daemon;
pub use discovery::{BeaconListener, DiscoveredPeer};
pub use ingest::{IngestionLoop, TurnStats};
pub use peer::{
    BeaconAnnouncer, Connector, FeedPublisher, PeerDirectory, PeerEvent, PeerId,
    SubscriptionPool, TcpConnector,
};
pub use retention::{ReapOutcome, RetentionReaper, reap_once};
pub use shutdown::{ShutdownCoordinator, ShutdownSummary};
pub use store::{BackupCoordinator, BackupMetadata, BackupReport, EventStore};
