//! Set of peer endpoints we are currently subscribed to.

use std::collections::HashSet;

/// Known peer endpoints.
///
/// An endpoint is present exactly while a live subscription to it exists.
/// Only the ingestion thread touches the directory, so it carries no lock.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    endpoints: HashSet<String>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.contains(endpoint)
    }

    /// Mark an endpoint known. Returns `false` if it already was.
    pub fn add(&mut self, endpoint: impl Into<String>) -> bool {
        self.endpoints.insert(endpoint.into())
    }

    /// Forget an endpoint. Returns `false` if it was not known.
    pub fn remove(&mut self, endpoint: &str) -> bool {
        self.endpoints.remove(endpoint)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(String::as_str)
    }
}
