//! Error types for the eventsink wire formats.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding beacons and feed frames.
#[derive(Error, Debug)]
pub enum Error {
    /// Beacon datagram is not valid UTF-8.
    #[error("beacon is not valid UTF-8")]
    BeaconEncoding,

    /// Beacon has no `:` separating the tag from the endpoint.
    #[error("beacon has no tag separator: {0:?}")]
    MissingSeparator(String),

    /// Beacon carries an empty endpoint.
    #[error("beacon '{tag}' has an empty endpoint")]
    EmptyEndpoint {
        /// The tag the beacon was announced under.
        tag: String,
    },

    /// A frame length prefix exceeds the allowed maximum.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared payload length.
        len: usize,
        /// Maximum accepted payload length.
        max: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
