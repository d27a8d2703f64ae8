//! Error types for the ingestion daemon.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting, retaining, or backing up events.
#[derive(Error, Debug)]
pub enum Error {
    /// Opening the store or creating its schema failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Appending an event failed.
    #[error("Write error: {0}")]
    Write(String),

    /// Deleting the oldest events failed.
    #[error("Delete error: {0}")]
    Delete(String),

    /// A point-in-time read against the store failed.
    #[error("Query error: {0}")]
    Query(String),

    /// The store has already been closed.
    #[error("event store is closed")]
    Closed,

    /// Copying the store or writing backup metadata failed.
    #[error("Backup error: {0}")]
    Backup(String),

    /// A peer endpoint could not be parsed or resolved.
    #[error("Invalid peer endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The endpoint as announced.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The transport refused to open a connection to a peer.
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        /// The endpoint we tried to reach.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Installing a signal handler failed.
    #[error("Signal handler error: {0}")]
    Signal(String),

    /// Wire format error.
    #[error("Wire format error: {0}")]
    Core(#[from] eventsink_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let err = Error::Connect {
            endpoint: "tcp://10.0.0.5:9000".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("tcp://10.0.0.5:9000"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_invalid_endpoint_display() {
        let err = Error::InvalidEndpoint {
            endpoint: "udp://x".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_from_core_error() {
        let err: Error = eventsink_core::Error::FrameTooLarge { len: 2, max: 1 }.into();
        assert!(matches!(err, Error::Core(_)));
    }
}
