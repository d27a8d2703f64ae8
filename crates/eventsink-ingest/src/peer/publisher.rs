//! The publishing side of a peer: beacons and a frame feed.
//!
//! The daemon never publishes; these types back the `eventsink-emit` tool
//! and the end-to-end tests.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};

use eventsink_core::{Beacon, write_frame};
use tracing::{debug, info};

use super::connector::TCP_SCHEME;
use crate::Result;

/// Accepts subscribers and sends every published payload to each of them.
pub struct FeedPublisher {
    listener: TcpListener,
    subscribers: Vec<(SocketAddr, TcpStream)>,
}

impl FeedPublisher {
    /// Listen for subscribers on `addr`.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("Feed listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            subscribers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The endpoint to announce in beacons.
    pub fn endpoint(&self) -> Result<String> {
        Ok(format!("{}{}", TCP_SCHEME, self.local_addr()?))
    }

    /// Accept every subscriber waiting in the backlog.
    ///
    /// Returns the number of newly accepted subscribers.
    pub fn accept_pending(&mut self) -> Result<usize> {
        let mut accepted = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false)?;
                    info!("Subscriber connected from {}", addr);
                    self.subscribers.push((addr, stream));
                    accepted += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(accepted),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one frame to every subscriber.
    ///
    /// Subscribers whose write fails are dropped. Returns how many received
    /// the frame.
    pub fn publish(&mut self, payload: &[u8]) -> Result<usize> {
        self.accept_pending()?;

        self.subscribers
            .retain_mut(|(addr, stream)| match write_frame(stream, payload) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Dropping subscriber {}: {}", addr, e);
                    false
                }
            });

        Ok(self.subscribers.len())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Sends this peer's beacon to a discovery address.
pub struct BeaconAnnouncer {
    socket: UdpSocket,
    target: SocketAddr,
    datagram: Vec<u8>,
}

impl BeaconAnnouncer {
    /// Announce `beacon` to `target` (typically a broadcast address).
    pub fn new(beacon: &Beacon, target: SocketAddr) -> Result<Self> {
        let bind_addr: SocketAddr = if target.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        if target.is_ipv4() {
            socket.set_broadcast(true)?;
        }

        Ok(Self {
            socket,
            target,
            datagram: beacon.encode(),
        })
    }

    /// Send one beacon.
    pub fn announce(&self) -> Result<()> {
        self.socket.send_to(&self.datagram, self.target)?;
        Ok(())
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsink_core::{EVENT_SOURCE_TAG, FrameDecoder};
    use std::io::Read;
    use std::time::Duration;

    #[test]
    fn test_publish_reaches_subscribers() {
        let mut publisher = FeedPublisher::bind("127.0.0.1:0").unwrap();
        let mut subscriber = TcpStream::connect(publisher.local_addr().unwrap()).unwrap();

        // Accept may race the connect; retry until it lands
        for _ in 0..50 {
            if publisher.accept_pending().unwrap() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(publisher.publish(b"hello").unwrap(), 1);
        drop(publisher);

        let mut received = Vec::new();
        subscriber.read_to_end(&mut received).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&received);
        assert_eq!(decoder.next_frame().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_endpoint_uses_tcp_scheme() {
        let publisher = FeedPublisher::bind("127.0.0.1:0").unwrap();
        let endpoint = publisher.endpoint().unwrap();
        assert!(endpoint.starts_with("tcp://127.0.0.1:"));
    }

    #[test]
    fn test_announce_sends_beacon() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let beacon = Beacon::new(EVENT_SOURCE_TAG, "tcp://127.0.0.1:7000");
        let announcer = BeaconAnnouncer::new(&beacon, receiver.local_addr().unwrap()).unwrap();
        announcer.announce().unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(Beacon::parse(&buf[..n]).unwrap(), beacon);
    }
}
