//! The ingestion loop.
//!
//! One task waits on three sources at once:
//!
//! 1. The control handle, woken by signal handlers
//! 2. The discovery socket, whose beacons open new subscriptions
//! 3. The peer channel, carrying frames and closures from reader tasks
//!
//! Frames are appended to the store in the order their reader task sent
//! them, so per-peer arrival order is preserved. A closed subscription is
//! removed from the pool as soon as its closure message is handled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::control::ControlHandle;
use crate::counters::RetentionCounters;
use crate::discovery::{BeaconListener, DiscoveredPeer};
use crate::peer::{Connector, PeerEvent, SubscriptionPool, TcpConnector};
use crate::store::EventStore;
use crate::Result;

/// Frames buffered between reader tasks and the loop.
const PEER_CHANNEL_CAPACITY: usize = 1024;

/// Most peer messages handled in one turn, so control requests are seen
/// even while peers stream continuously.
const MAX_PEER_EVENTS_PER_TURN: usize = PEER_CHANNEL_CAPACITY;

/// What happened during one [`IngestionLoop::turn`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TurnStats {
    /// Beacons that passed the tag filter.
    pub beacons: usize,
    /// New subscriptions opened.
    pub peers_added: usize,
    /// Subscriptions torn down.
    pub peers_removed: usize,
    /// Frames appended to the store.
    pub appended: usize,
    /// Frames that could not be appended.
    pub append_errors: usize,
    /// Whether a control request woke the loop.
    pub woken: bool,
}

/// What woke a turn.
enum Wake {
    Control,
    Beacons(Result<Vec<DiscoveredPeer>>),
    Peer(PeerEvent),
    Idle,
}

/// Owns the discovery socket and every peer subscription.
pub struct IngestionLoop<C = TcpConnector> {
    discovery: Option<BeaconListener>,
    pool: SubscriptionPool<C>,
    peer_events: mpsc::Receiver<PeerEvent>,
    store: Arc<EventStore>,
    counters: Arc<RetentionCounters>,
    control: ControlHandle,
}

impl<C: Connector> IngestionLoop<C> {
    /// Bind discovery and create an empty pool.
    pub async fn new(
        discovery_addr: SocketAddr,
        beacon_filter: &str,
        connector: C,
        store: Arc<EventStore>,
        counters: Arc<RetentionCounters>,
    ) -> Result<Self> {
        let discovery = BeaconListener::bind(discovery_addr, beacon_filter).await?;
        let (peer_tx, peer_events) = mpsc::channel(PEER_CHANNEL_CAPACITY);

        info!(
            "Listening for '{}' beacons on {}",
            beacon_filter,
            discovery.local_addr()?
        );

        Ok(Self {
            discovery: Some(discovery),
            pool: SubscriptionPool::new(connector, peer_tx),
            peer_events,
            store,
            counters,
            control: ControlHandle::new(),
        })
    }

    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn pool(&self) -> &SubscriptionPool<C> {
        &self.pool
    }

    /// Address the discovery socket is bound to.
    pub fn discovery_addr(&self) -> Result<SocketAddr> {
        match &self.discovery {
            Some(discovery) => discovery.local_addr(),
            None => Err(crate::Error::Closed),
        }
    }

    /// Wait for one wake-up (at most `timeout`, `None` waits indefinitely)
    /// and handle everything that is ready.
    ///
    /// Nothing is persisted once shutdown has been requested.
    pub async fn turn(&mut self, timeout: Option<Duration>) -> Result<TurnStats> {
        let mut stats = TurnStats::default();

        let wake = tokio::select! {
            biased;
            _ = self.control.woken() => Wake::Control,
            beacons = recv_discovery(&mut self.discovery) => Wake::Beacons(beacons),
            Some(event) = self.peer_events.recv() => Wake::Peer(event),
            _ = idle(timeout) => Wake::Idle,
        };

        if self.control.shutdown_requested() {
            return Ok(stats);
        }

        match wake {
            Wake::Control => stats.woken = true,
            Wake::Beacons(Ok(peers)) => self.handle_discovery(peers, &mut stats),
            Wake::Beacons(Err(e)) => warn!("Discovery receive failed: {}", e),
            Wake::Peer(event) => {
                self.handle_peer_event(event, &mut stats);
                // Handle what else is already queued, up to the per-turn limit
                for _ in 1..MAX_PEER_EVENTS_PER_TURN {
                    if self.control.shutdown_requested() {
                        break;
                    }
                    match self.peer_events.try_recv() {
                        Ok(event) => self.handle_peer_event(event, &mut stats),
                        Err(_) => break,
                    }
                }
            }
            Wake::Idle => {}
        }

        Ok(stats)
    }

    fn handle_discovery(&mut self, peers: Vec<DiscoveredPeer>, stats: &mut TurnStats) {
        for peer in peers {
            stats.beacons += 1;
            match self.pool.add_peer(&peer.endpoint) {
                Ok(Some(_)) => stats.peers_added += 1,
                Ok(None) => {}
                Err(e) => warn!(
                    "Cannot subscribe to {} (from {}): {}",
                    peer.endpoint, peer.announcer, e
                ),
            }
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent, stats: &mut TurnStats) {
        match event {
            PeerEvent::Frame { peer, payload } => {
                if self.pool.contains(peer) {
                    persist(&self.store, &self.counters, &payload, stats);
                }
            }
            PeerEvent::Closed { peer, reason } => {
                if let Some(endpoint) = self.pool.remove_peer(peer) {
                    warn!("Dropped peer {}: {}", endpoint, reason);
                    metrics::counter!("eventsink_peer_errors_total").increment(1);
                    stats.peers_removed += 1;
                }
            }
        }
    }

    /// Close every subscription and the discovery socket.
    ///
    /// Returns the number of subscriptions closed.
    pub fn close(&mut self) -> usize {
        let closed = self.pool.close_all();
        if self.discovery.take().is_some() {
            debug!("Discovery socket closed");
        }
        self.peer_events.close();
        closed
    }
}

/// Wait for beacons, or forever once discovery is closed.
async fn recv_discovery(discovery: &mut Option<BeaconListener>) -> Result<Vec<DiscoveredPeer>> {
    match discovery {
        Some(listener) => listener.recv_beacons().await,
        None => std::future::pending().await,
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Append one frame and account for it.
fn persist(
    store: &EventStore,
    counters: &RetentionCounters,
    frame: &[u8],
    stats: &mut TurnStats,
) {
    match store.append(frame) {
        Ok(id) => {
            counters.record_processed();
            metrics::counter!("eventsink_events_processed_total").increment(1);
            stats.appended += 1;
            debug!(id, len = frame.len(), "Stored event");
        }
        Err(e) => {
            metrics::counter!("eventsink_append_errors_total").increment(1);
            stats.append_errors += 1;
            error!("Failed to store event: {}", e);
        }
    }
}
