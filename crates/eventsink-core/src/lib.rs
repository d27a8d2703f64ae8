//! Shared types, wire formats, and metrics helpers for the eventsink daemon.
//!
//! This crate provides:
//! - The discovery beacon format (`<tag>:<endpoint>`)
//! - The length-prefixed feed frame codec
//! - The stored [`Event`] type
//! - Prometheus metrics helpers
//! - Shared error types

pub mod beacon;
mod error;
mod event;
pub mod frame;
pub mod metrics;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// UDP port beacons are broadcast on.
pub const DEFAULT_BEACON_PORT: u16 = 5555;

/// Tag that event publishers announce themselves under.
pub const EVENT_SOURCE_TAG: &str = "EVENT_SRC";

pub use beacon::Beacon;
pub use error::{Error, Result};
pub use event::{Event, EventId};
pub use frame::{FrameDecoder, MAX_FRAME_SIZE, encode_frame, write_frame};
