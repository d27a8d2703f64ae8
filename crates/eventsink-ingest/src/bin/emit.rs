//! Test event publisher.
//!
//! Announces a feed with `EVENT_SRC:<endpoint>` beacons and publishes every
//! line read from stdin as one frame to all connected subscribers. Exits when
//! stdin is closed.
//!
//! # Usage
//!
//! ```bash
//! # Publish on a random port, advertise it on localhost
//! seq 1 100 | eventsink-emit
//!
//! # Broadcast beacons on the LAN
//! tail -f readings.log | eventsink-emit \
//!     --listen 0.0.0.0:7000 \
//!     --advertise-host 192.168.1.20 \
//!     --beacon-target 255.255.255.255:5555
//! ```

use std::io::BufRead;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, bounded};
use eventsink_core::{Beacon, EVENT_SOURCE_TAG};
use eventsink_ingest::{BeaconAnnouncer, FeedPublisher};
use tracing_subscriber::EnvFilter;

/// Test event publisher.
#[derive(Parser, Debug)]
#[command(name = "eventsink-emit")]
#[command(about = "Announce a feed and publish stdin lines as events")]
#[command(version)]
struct Args {
    /// Address the feed listens on
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: SocketAddr,

    /// Host put in the announced endpoint
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Where beacons are sent
    #[arg(long, default_value = "127.0.0.1:5555")]
    beacon_target: SocketAddr,

    /// Beacon tag
    #[arg(long, default_value = EVENT_SOURCE_TAG)]
    tag: String,

    /// Milliseconds between beacons
    #[arg(long, default_value = "1000")]
    interval_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("eventsink_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut publisher = FeedPublisher::bind(args.listen)
        .with_context(|| format!("Failed to listen on {}", args.listen))?;
    let port = publisher.local_addr()?.port();
    let endpoint = format!("tcp://{}:{}", args.advertise_host, port);

    let announcer = BeaconAnnouncer::new(&Beacon::new(&args.tag, &endpoint), args.beacon_target)
        .context("Failed to create beacon socket")?;
    tracing::info!("Announcing {} to {}", endpoint, announcer.target());

    // Read stdin on its own thread so beacons keep flowing while it blocks
    let (lines_tx, lines_rx) = bounded::<String>(1024);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if lines_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    let interval = Duration::from_millis(args.interval_ms.max(1));
    let mut next_beacon = Instant::now();
    let mut published = 0u64;

    loop {
        let now = Instant::now();
        if now >= next_beacon {
            if let Err(e) = announcer.announce() {
                tracing::warn!("Failed to send beacon: {}", e);
            }
            next_beacon = now + interval;
        }
        publisher.accept_pending()?;

        match lines_rx.recv_timeout(next_beacon.saturating_duration_since(Instant::now())) {
            Ok(line) => {
                let delivered = publisher.publish(line.as_bytes())?;
                published += 1;
                tracing::debug!(delivered, "Published event {}", published);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!(
        "stdin closed after {} events ({} subscribers)",
        published,
        publisher.subscriber_count()
    );

    Ok(())
}
