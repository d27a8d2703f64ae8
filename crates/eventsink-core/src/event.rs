//! Stored event type.

use std::borrow::Cow;

/// Store-assigned event identifier. Strictly increasing per store.
pub type EventId = i64;

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Identifier assigned by the store on append.
    pub id: EventId,
    /// Opaque frame payload as received from the peer.
    pub payload: Vec<u8>,
}

impl Event {
    /// The payload as text, replacing invalid UTF-8 sequences.
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
