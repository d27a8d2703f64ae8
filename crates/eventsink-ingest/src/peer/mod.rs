//! Peer management: known endpoints, live subscriptions, and the
//! publishing side used by test peers.

mod connector;
mod directory;
mod pool;
mod publisher;

pub use connector::{
    ConnectFuture, Connector, TCP_SCHEME, TcpConnector, normalize_endpoint, resolve_endpoint,
};
pub use directory::PeerDirectory;
pub use pool::{PeerEvent, PeerId, SubscriptionPool};
pub use publisher::{BeaconAnnouncer, FeedPublisher};
