//! UDP beacon discovery.
//!
//! Peers announce themselves with `<tag>:<endpoint>` datagrams. The listener
//! waits for the socket to become readable, then drains every pending
//! datagram and hands back the endpoints announced under the configured
//! tag. Anything malformed is logged and dropped.

use std::io;
use std::net::SocketAddr;

use eventsink_core::Beacon;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::Result;

/// Largest datagram we read; beacons are far smaller.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// A beacon that passed the tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Source address of the datagram.
    pub announcer: SocketAddr,
    /// Feed endpoint announced in the beacon.
    pub endpoint: String,
}

/// Listens for discovery beacons.
pub struct BeaconListener {
    socket: UdpSocket,
    filter: String,
    buf: Vec<u8>,
}

impl BeaconListener {
    /// Bind the discovery socket.
    pub async fn bind(addr: SocketAddr, filter: impl Into<String>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(Self {
            socket,
            filter: filter.into(),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Wait for datagrams, then return every accepted beacon.
    ///
    /// Cancel safe: nothing is read until the socket is readable. May return
    /// an empty list on a spurious wake or when only rejected datagrams
    /// arrived.
    pub async fn recv_beacons(&mut self) -> Result<Vec<DiscoveredPeer>> {
        self.socket.readable().await?;
        Ok(self.drain())
    }

    /// Read every datagram already queued, without waiting.
    pub fn drain(&mut self) -> Vec<DiscoveredPeer> {
        let mut peers = Vec::new();

        loop {
            let (len, announcer) = match self.socket.try_recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Discovery socket error: {}", e);
                    break;
                }
            };

            match Beacon::parse(&self.buf[..len]) {
                Ok(beacon) if beacon.matches(&self.filter) => {
                    metrics::counter!("eventsink_beacons_total", "outcome" => "accepted")
                        .increment(1);
                    peers.push(DiscoveredPeer {
                        announcer,
                        endpoint: beacon.endpoint,
                    });
                }
                Ok(beacon) => {
                    metrics::counter!("eventsink_beacons_total", "outcome" => "filtered")
                        .increment(1);
                    debug!(tag = %beacon.tag, "Ignoring beacon from {}", announcer);
                }
                Err(e) => {
                    metrics::counter!("eventsink_beacons_total", "outcome" => "malformed")
                        .increment(1);
                    debug!("Dropping malformed beacon from {}: {}", announcer, e);
                }
            }
        }

        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsink_core::EVENT_SOURCE_TAG;
    use std::time::Duration;

    async fn listener() -> BeaconListener {
        BeaconListener::bind("127.0.0.1:0".parse().unwrap(), EVENT_SOURCE_TAG)
            .await
            .unwrap()
    }

    /// Receive until at least `want` beacons arrived.
    async fn collect(listener: &mut BeaconListener, want: usize) -> Vec<DiscoveredPeer> {
        let mut peers = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while peers.len() < want {
                peers.extend(listener.recv_beacons().await.unwrap());
            }
        })
        .await
        .unwrap();
        peers
    }

    #[tokio::test]
    async fn test_accepts_matching_beacons_and_drops_the_rest() {
        let mut listener = listener().await;
        let target = listener.local_addr().unwrap();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"OTHER:tcp://127.0.0.1:1", target).unwrap();
        sender.send_to(b"no separator", target).unwrap();
        sender.send_to(b"EVENT_SRC:", target).unwrap();
        sender.send_to(&[0xff, 0xfe, b':', b'x'], target).unwrap();
        sender.send_to(b"EVENT_SRC:tcp://127.0.0.1:7000", target).unwrap();
        sender.send_to(b"EVENT_SRC:tcp://127.0.0.1:7001", target).unwrap();

        let peers = collect(&mut listener, 2).await;
        let endpoints: Vec<&str> = peers.iter().map(|p| p.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["tcp://127.0.0.1:7000", "tcp://127.0.0.1:7001"]);
        assert_eq!(peers[0].announcer, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_drain_without_datagrams_yields_nothing() {
        let mut listener = listener().await;
        assert!(listener.drain().is_empty());
        assert_eq!(listener.filter(), "EVENT_SRC");
    }
}
