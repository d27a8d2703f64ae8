//! Discovery beacon format.
//!
//! Publishers announce their feed by broadcasting a UDP datagram of the form
//!
//! ```text
//! <tag>:<endpoint>
//! ```
//!
//! e.g. `EVENT_SRC:tcp://10.0.0.5:9000`. The endpoint is everything after the
//! first `:`, so endpoints may themselves contain colons.

use crate::error::{Error, Result};

/// A parsed discovery beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Filter tag the beacon was announced under.
    pub tag: String,
    /// Feed endpoint of the announcing peer.
    pub endpoint: String,
}

impl Beacon {
    /// Create a beacon for `endpoint` under `tag`.
    pub fn new(tag: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Parse a raw datagram.
    ///
    /// Trailing NUL padding is ignored.
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(datagram).map_err(|_| Error::BeaconEncoding)?;
        let text = text.trim_end_matches('\0');

        let (tag, endpoint) = text
            .split_once(':')
            .ok_or_else(|| Error::MissingSeparator(text.to_string()))?;

        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::EmptyEndpoint {
                tag: tag.to_string(),
            });
        }

        Ok(Self::new(tag, endpoint))
    }

    /// Whether this beacon was announced under `filter`.
    pub fn matches(&self, filter: &str) -> bool {
        self.tag == filter
    }

    /// Encode the beacon as a datagram payload.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}", self.tag, self.endpoint).into_bytes()
    }
}
