//! TCP listener and session dispatch.
//!
//! Accepts client connections and hands each one to a proxy session bound
//! to the primary epoch current at accept time. When no primary is known
//! yet the client is dropped immediately rather than left hanging.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Instrument};

use crate::config::Config;
use crate::tracker::PrimaryState;

use super::session;

/// Pause after a failed accept to avoid a tight error loop.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Counters for a listener. Sessions update the byte and close counts.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being proxied.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to the max-connections limit.
    pub connections_rejected: AtomicU64,
    /// Accepts dropped because no primary was known yet.
    pub no_primary_drops: AtomicU64,
    /// Sessions that failed to dial the primary.
    pub dial_failures: AtomicU64,
    /// Sessions torn down by a primary change.
    pub forced_closes: AtomicU64,
    /// Bytes relayed client to primary.
    pub bytes_to_primary: AtomicU64,
    /// Bytes relayed primary to client.
    pub bytes_from_primary: AtomicU64,
}

/// The proxy's accept loop plus its shared dependencies.
pub struct Listener {
    listener: TcpListener,
    state: Arc<PrimaryState>,
    dial_timeout: Duration,
    conn_semaphore: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the configured local address.
    pub async fn bind(config: &Config, state: Arc<PrimaryState>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;

        info!(
            bind_addr = %listener.local_addr()?,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            listener,
            state,
            dial_timeout: config.dial_timeout,
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections forever, spawning one session per client.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        info!(bind_addr = %self.listener.local_addr()?, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((client, peer_addr)) => {
                    // Address and epoch signal come from one snapshot, so
                    // the pair is always from the same tracker publish.
                    let Some(epoch) = self.state.snapshot() else {
                        self.stats.no_primary_drops.fetch_add(1, Ordering::Relaxed);
                        warn!(peer_addr = %peer_addr, "No primary known yet; dropping client");
                        continue;
                    };

                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                    let stats = Arc::clone(&self.stats);
                    let dial_timeout = self.dial_timeout;

                    tokio::spawn(
                        async move {
                            session::run(client, peer_addr, epoch, dial_timeout, Arc::clone(&stats))
                                .await;

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("session", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            }
        }
    }
}
