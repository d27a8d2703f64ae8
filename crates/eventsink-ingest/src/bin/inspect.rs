//! Store and backup inspection utility.
//!
//! Prints the event count and id range of a live store or backup file, and
//! the backup metadata rows when the file is a backup.
//!
//! # Usage
//!
//! ```bash
//! eventsink-inspect ./data/events-7.db
//! eventsink-inspect ./backup/events-7-2024-06-01T12-00-00.db --events 5
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use eventsink_ingest::EventStore;

/// Store and backup inspection utility.
#[derive(Parser, Debug)]
#[command(name = "eventsink-inspect")]
#[command(about = "Show the contents summary of an eventsink store or backup")]
#[command(version)]
struct Args {
    /// Path to the store or backup file
    path: PathBuf,

    /// Also print the newest N events
    #[arg(long, default_value = "0")]
    events: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if !args.path.exists() {
        bail!("{} does not exist", args.path.display());
    }

    let store = EventStore::open_read_only(&args.path)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;

    let count = store.count()?;
    let min_id = store.min_id()?;
    let max_id = store.max_id()?;

    println!("File:    {}", args.path.display());
    println!("Events:  {}", count);
    match (min_id, max_id) {
        (Some(min), Some(max)) => println!("Ids:     {}..={}", min, max),
        _ => println!("Ids:     (empty)"),
    }

    let metadata = store.backup_metadata()?;
    if !metadata.is_empty() {
        println!();
        println!("Backup metadata:");
        for row in &metadata {
            println!(
                "  {}  store={}  first={}  last={}  lost={}",
                row.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                row.store_id,
                row.first_event.map_or_else(|| "-".to_string(), |id| id.to_string()),
                row.last_event.map_or_else(|| "-".to_string(), |id| id.to_string()),
                row.lost_events
            );
        }
    }

    if let (Some(min), Some(max)) = (min_id, max_id)
        && args.events > 0
    {
        println!();
        let start = newest_start(min, max, args.events);
        for id in start..=max {
            if let Some(event) = store.get(id)? {
                println!("  #{:<8} {}", event.id, event.payload_lossy());
            }
        }
    }

    store.close()?;
    Ok(())
}

/// First id of the newest `n` events in `min..=max`. `n` must be positive.
fn newest_start(min: i64, max: i64, n: u64) -> i64 {
    let span = i64::try_from(n - 1).unwrap_or(i64::MAX);
    max.saturating_sub(span).max(min)
}
