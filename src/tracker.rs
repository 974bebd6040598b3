//! Primary tracking and epoch state.
//!
//! The tracker polls sentinel discovery forever and is the only writer of
//! the shared primary snapshot. Each published snapshot pairs the primary
//! address with the broadcast signal that ends its epoch; sessions read
//! the pair atomically at accept time, so an address is never observed
//! with a signal from a different epoch.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery;

/// One primary epoch: an address plus the signal that ends it.
#[derive(Debug)]
pub struct PrimaryEpoch {
    /// Address of the primary for this epoch.
    pub addr: SocketAddr,
    /// Monotonic epoch counter, starting at 1.
    pub epoch: u64,
    expired: watch::Receiver<bool>,
}

impl PrimaryEpoch {
    /// Wait until this epoch ends.
    ///
    /// Resolves immediately when the epoch has already ended, and also
    /// when the tracker side is gone entirely.
    pub async fn expired(&self) {
        let mut rx = self.expired.clone();
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Whether this epoch has already ended.
    pub fn is_expired(&self) -> bool {
        *self.expired.borrow()
    }
}

/// Shared slot holding the current epoch snapshot.
///
/// Empty until the first successful discovery. Reads are lock-free and
/// always see a consistent (address, signal) pair.
pub struct PrimaryState {
    current: ArcSwapOption<PrimaryEpoch>,
}

impl PrimaryState {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::const_empty(),
        }
    }

    /// Atomic snapshot of the current epoch, if any primary is known.
    pub fn snapshot(&self) -> Option<Arc<PrimaryEpoch>> {
        self.current.load_full()
    }

    /// Current primary address, if known.
    pub fn primary_addr(&self) -> Option<SocketAddr> {
        self.current.load().as_ref().map(|epoch| epoch.addr)
    }
}

impl Default for PrimaryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Sole writer of [`PrimaryState`]. Owns the live epoch's signal sender.
pub struct PrimaryTracker {
    state: Arc<PrimaryState>,
    expire_tx: watch::Sender<bool>,
    epoch: u64,
}

impl PrimaryTracker {
    pub fn new(state: Arc<PrimaryState>) -> Self {
        let (expire_tx, _) = watch::channel(false);
        Self {
            state,
            expire_tx,
            epoch: 0,
        }
    }

    /// Record a discovery result. On an address change this publishes a
    /// fresh epoch and then fires the previous epoch's signal, forcing
    /// every in-flight session from that epoch to tear down.
    ///
    /// Returns true when a transition happened.
    pub fn observe(&mut self, addr: SocketAddr) -> bool {
        let previous = self.state.primary_addr();
        if previous == Some(addr) {
            return false;
        }

        self.epoch += 1;
        let (expire_tx, expired) = watch::channel(false);
        self.state.current.store(Some(Arc::new(PrimaryEpoch {
            addr,
            epoch: self.epoch,
            expired,
        })));

        // The new snapshot is visible before the old epoch fires, so no
        // reader ever holds a live signal for a stale address.
        let old_tx = std::mem::replace(&mut self.expire_tx, expire_tx);
        let _ = old_tx.send(true);

        match previous {
            Some(old) => {
                info!(old = %old, new = %addr, epoch = self.epoch, "Primary address changed")
            }
            None => info!(primary = %addr, epoch = self.epoch, "Primary discovered"),
        }

        true
    }

    /// Run the polling loop. Never returns.
    pub async fn run(mut self, config: Config) {
        loop {
            match discovery::find_primary(
                &config.sentinel_addr,
                &config.primary_name,
                config.discovery_timeout,
            )
            .await
            {
                Ok(Some(addr)) => {
                    self.observe(addr);
                }
                Ok(None) => {
                    // No usable candidate this round. Keep the current
                    // primary; a sentinel outage is not a failover.
                }
                Err(e) => {
                    warn!(error = %e, "Primary discovery failed");
                    tokio::time::sleep(config.retry_interval).await;
                    continue;
                }
            }

            if self.state.primary_addr().is_none() {
                // Nothing discovered yet; the cluster is probably still
                // coming up. Poll gently.
                tokio::time::sleep(config.retry_interval).await;
            } else {
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}
