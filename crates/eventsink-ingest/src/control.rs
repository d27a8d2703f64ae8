//! Out-of-band requests to the ingestion loop.
//!
//! Signal handlers never touch the store or the sockets. They set a flag and
//! wake the loop, and the loop acts on the flag at its next turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::info;

use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    shutdown: AtomicBool,
    backup: AtomicBool,
    wake: Notify,
}

/// Cloneable handle for requesting shutdown or a backup.
///
/// Safe to use from any thread, including signal helper threads.
#[derive(Clone, Default)]
pub struct ControlHandle {
    inner: Arc<Inner>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the ingestion loop to stop.
    ///
    /// Returns `true` for the first request only.
    pub fn request_shutdown(&self) -> bool {
        let first = !self.inner.shutdown.swap(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
        first
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Ask the ingestion loop to take a backup at its next turn.
    pub fn request_backup(&self) {
        self.inner.backup.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    /// Consume a pending backup request.
    pub fn take_backup_request(&self) -> bool {
        self.inner.backup.swap(false, Ordering::SeqCst)
    }

    /// Wait until a request is made.
    ///
    /// A request made while nobody is waiting is remembered, so the next call
    /// returns immediately.
    pub async fn woken(&self) {
        self.inner.wake.notified().await;
    }
}

/// Route process signals to `control`.
///
/// SIGINT, SIGTERM and SIGHUP request shutdown. On unix, SIGUSR1 requests a
/// backup. Must be called from within a Tokio runtime, once per process.
pub fn install_signal_handlers(control: &ControlHandle) -> Result<()> {
    let shutdown = control.clone();
    ctrlc::set_handler(move || {
        if shutdown.request_shutdown() {
            info!("Shutdown signal received, stopping gracefully...");
        }
    })
    .map_err(|e| Error::Signal(format!("Failed to set shutdown handler: {}", e)))?;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut usr1 = signal(SignalKind::user_defined1())
            .map_err(|e| Error::Signal(format!("Failed to register SIGUSR1: {}", e)))?;
        let backup = control.clone();
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                info!("Backup signal received");
                backup.request_backup();
            }
        });
    }

    Ok(())
}
