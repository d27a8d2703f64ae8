//! Peer endpoint parsing and connection setup.
//!
//! Endpoints are announced as `tcp://<host>:<port>`. Before connecting we:
//! - Trim whitespace and trailing slashes
//! - Lowercase the scheme
//! - Reject any scheme other than `tcp`
//! - Resolve the host to a socket address

use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;

use tokio::net::TcpStream;

use crate::{Error, Result};

/// The only transport scheme peers may announce.
pub const TCP_SCHEME: &str = "tcp://";

/// A pending connection to a peer.
pub type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

/// Opens subscriber connections to peers.
///
/// The subscription pool only ever talks to peers through this trait, so
/// tests can substitute a connector that fails or redirects. The returned
/// future is driven by the peer's reader task; its error tears the
/// subscription down like any other read failure.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, addr: SocketAddr) -> ConnectFuture;
}

/// Connects over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> ConnectFuture {
        Box::pin(TcpStream::connect(addr))
    }
}

/// Normalize an announced endpoint.
///
/// Used as the dedup key in the peer directory, so cosmetic variations of
/// the same endpoint map to one subscription.
pub fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');

    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return Err(invalid(endpoint, "missing scheme, expected tcp://host:port"));
    };

    if !scheme.eq_ignore_ascii_case("tcp") {
        return Err(invalid(endpoint, "unsupported scheme, expected tcp://"));
    }
    if rest.is_empty() {
        return Err(invalid(endpoint, "missing host"));
    }

    Ok(format!("{}{}", TCP_SCHEME, rest))
}

/// Resolve an endpoint to the first socket address it names.
pub fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let normalized = normalize_endpoint(endpoint)?;
    let host_port = &normalized[TCP_SCHEME.len()..];

    let mut addrs = host_port
        .to_socket_addrs()
        .map_err(|e| invalid(endpoint, &format!("cannot resolve: {}", e)))?;

    addrs
        .next()
        .ok_or_else(|| invalid(endpoint, "resolved to no addresses"))
}

fn invalid(endpoint: &str, reason: &str) -> Error {
    Error::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}
