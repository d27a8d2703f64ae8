//! Live peer subscriptions keyed by stable peer id.
//!
//! Every subscription is a reader task that connects, decodes frames and
//! forwards them over one shared channel to the ingestion loop. Tasks never
//! touch the store; when a task finishes, for whatever reason, its last
//! message is a [`PeerEvent::Closed`] and the loop removes it from the pool.

use std::collections::BTreeMap;
use std::fmt;

use eventsink_core::FrameDecoder;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connector::{
    ConnectFuture, Connector, TcpConnector, normalize_endpoint, resolve_endpoint,
};
use super::directory::PeerDirectory;
use crate::{Error, Result};

/// Bytes read from a peer socket per call.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Stable id of one subscription. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Message from a reader task to the ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// One complete frame, in arrival order.
    Frame { peer: PeerId, payload: Vec<u8> },
    /// The subscription is finished and must be removed.
    Closed { peer: PeerId, reason: String },
}

struct Subscription {
    endpoint: String,
    task: JoinHandle<()>,
}

/// Owns every live subscription and the directory of known endpoints.
///
/// Touched only from the ingestion loop.
pub struct SubscriptionPool<C = TcpConnector> {
    connector: C,
    events: mpsc::Sender<PeerEvent>,
    directory: PeerDirectory,
    subscriptions: BTreeMap<PeerId, Subscription>,
    next_id: u64,
}

impl<C: Connector> SubscriptionPool<C> {
    /// Create an empty pool whose reader tasks report to `events`.
    pub fn new(connector: C, events: mpsc::Sender<PeerEvent>) -> Self {
        Self {
            connector,
            events,
            directory: PeerDirectory::new(),
            subscriptions: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Subscribe to `endpoint` unless it is already known.
    ///
    /// Returns the new subscription's id, or `None` if the endpoint was
    /// already subscribed. An endpoint that cannot be parsed or resolved is
    /// rejected here and not marked known. A refused connection is reported
    /// later as a [`PeerEvent::Closed`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_peer(&mut self, endpoint: &str) -> Result<Option<PeerId>> {
        let endpoint = normalize_endpoint(endpoint)?;
        if self.directory.contains(&endpoint) {
            debug!("Already subscribed to {}", endpoint);
            return Ok(None);
        }

        let addr = resolve_endpoint(&endpoint)?;
        let peer = PeerId(self.next_id);
        self.next_id += 1;

        let task = tokio::spawn(run_subscription(
            peer,
            endpoint.clone(),
            self.connector.connect(addr),
            self.events.clone(),
        ));

        self.directory.add(endpoint.clone());
        info!(%peer, "Subscribing to {}", endpoint);
        self.subscriptions.insert(peer, Subscription { endpoint, task });
        self.update_gauge();

        Ok(Some(peer))
    }

    /// Tear down the subscription `peer` and forget its endpoint.
    ///
    /// Returns the endpoint, or `None` if the id was unknown.
    pub fn remove_peer(&mut self, peer: PeerId) -> Option<String> {
        let subscription = self.subscriptions.remove(&peer)?;
        subscription.task.abort();

        self.directory.remove(&subscription.endpoint);
        self.update_gauge();

        Some(subscription.endpoint)
    }

    /// Tear down every subscription. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        for endpoint in self.directory.iter() {
            debug!("Closing subscription to {}", endpoint);
        }
        let peers: Vec<PeerId> = self.subscriptions.keys().copied().collect();
        let closed = peers
            .into_iter()
            .filter(|peer| self.remove_peer(*peer).is_some())
            .count();
        if closed > 0 {
            info!("Closed {} peer subscriptions", closed);
        }
        closed
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.subscriptions.contains_key(&peer)
    }

    pub fn endpoint(&self, peer: PeerId) -> Option<&str> {
        self.subscriptions.get(&peer).map(|s| s.endpoint.as_str())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    fn update_gauge(&self) {
        metrics::gauge!("eventsink_peers_connected").set(self.subscriptions.len() as f64);
    }
}

impl<C> Drop for SubscriptionPool<C> {
    fn drop(&mut self) {
        for subscription in self.subscriptions.values() {
            subscription.task.abort();
        }
    }
}

/// Reader task for one subscription.
async fn run_subscription(
    peer: PeerId,
    endpoint: String,
    connect: ConnectFuture,
    events: mpsc::Sender<PeerEvent>,
) {
    let reason = match connect.await {
        Ok(mut stream) => {
            debug!(%peer, "Connected to {}", endpoint);
            read_frames(peer, &mut stream, &events).await
        }
        Err(source) => Error::Connect { endpoint, source }.to_string(),
    };

    // The loop may already be gone during shutdown
    let _ = events.send(PeerEvent::Closed { peer, reason }).await;
}

/// Forward frames until the stream ends. Returns why it ended.
async fn read_frames<R: AsyncRead + Unpin>(
    peer: PeerId,
    stream: &mut R,
    events: &mpsc::Sender<PeerEvent>,
) -> String {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => return "connection closed by peer".to_string(),
            Ok(n) => n,
            Err(e) => return format!("read error: {}", e),
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.next_frame() {
                Ok(Some(payload)) => {
                    if events.send(PeerEvent::Frame { peer, payload }).await.is_err() {
                        return "ingestion loop stopped".to_string();
                    }
                }
                Ok(None) => break,
                Err(e) => return e.to_string(),
            }
        }
    }
}
