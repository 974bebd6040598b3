//! Per-connection proxy session.
//!
//! A session relays bytes between one client and the primary until either
//! direction ends, errors, or the primary epoch it was born in expires.
//! Teardown drops all four stream halves on every path, so both sockets
//! are closed exactly once no matter which branch fired first.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::tracker::PrimaryEpoch;

use super::listener::ListenerStats;

const RELAY_BUF_SIZE: usize = 8192;

/// One relay direction and the stats counter it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToPrimary,
    FromPrimary,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::ToPrimary => "client->primary",
            Direction::FromPrimary => "primary->client",
        }
    }

    fn counter(self, stats: &ListenerStats) -> &AtomicU64 {
        match self {
            Direction::ToPrimary => &stats.bytes_to_primary,
            Direction::FromPrimary => &stats.bytes_from_primary,
        }
    }
}

/// Outcome of one relay direction.
struct RelayDone {
    bytes: u64,
    result: io::Result<()>,
}

/// Run one proxy session to completion.
pub(crate) async fn run(
    client: TcpStream,
    peer_addr: SocketAddr,
    epoch: Arc<PrimaryEpoch>,
    dial_timeout: Duration,
    stats: Arc<ListenerStats>,
) {
    let primary_addr = epoch.addr;

    // No retry here. The client is expected to reconnect, at which point
    // it picks up whatever epoch is current.
    let primary = match timeout(dial_timeout, TcpStream::connect(primary_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            stats.dial_failures.fetch_add(1, Ordering::Relaxed);
            warn!(primary = %primary_addr, error = %e, "Cannot reach primary; closing client");
            return;
        }
        Err(_) => {
            stats.dial_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                primary = %primary_addr,
                timeout_ms = dial_timeout.as_millis() as u64,
                "Primary dial timed out; closing client"
            );
            return;
        }
    };

    debug!(primary = %primary_addr, epoch = epoch.epoch, "Session established");

    let (client_read, client_write) = client.into_split();
    let (primary_read, primary_write) = primary.into_split();

    // Each relay feeds its stats counter as it copies, so no bytes are
    // lost when the losing direction is torn down mid-transfer.
    let mut to_primary = tokio::spawn(relay(
        client_read,
        primary_write,
        Direction::ToPrimary,
        Arc::clone(&stats),
    ));
    let mut from_primary = tokio::spawn(relay(
        primary_read,
        client_write,
        Direction::FromPrimary,
        Arc::clone(&stats),
    ));

    let mut to_primary_reaped = false;
    let mut from_primary_reaped = false;

    // Three-way race: the first branch to fire decides the close reason.
    tokio::select! {
        _ = epoch.expired() => {
            stats.forced_closes.fetch_add(1, Ordering::Relaxed);
            info!(
                peer_addr = %peer_addr,
                primary = %primary_addr,
                epoch = epoch.epoch,
                "Primary changed; forcing session closed"
            );
        }
        done = &mut to_primary => {
            log_close_reason(Direction::ToPrimary, &done, peer_addr, primary_addr);
            to_primary_reaped = true;
        }
        done = &mut from_primary => {
            log_close_reason(Direction::FromPrimary, &done, peer_addr, primary_addr);
            from_primary_reaped = true;
        }
    }

    // Aborting drops the owned stream halves, which closes both sockets
    // and releases whichever relay is still blocked on I/O. Draining the
    // handle keeps the close deterministic; a finished handle is never
    // polled a second time.
    if !to_primary_reaped {
        to_primary.abort();
        let _ = to_primary.await;
    }
    if !from_primary_reaped {
        from_primary.abort();
        let _ = from_primary.await;
    }

    debug!(peer_addr = %peer_addr, primary = %primary_addr, "Session closed");
}

fn log_close_reason(
    direction: Direction,
    done: &Result<RelayDone, JoinError>,
    peer_addr: SocketAddr,
    primary_addr: SocketAddr,
) {
    match done {
        Ok(RelayDone {
            bytes,
            result: Ok(()),
        }) => {
            info!(
                peer_addr = %peer_addr,
                primary = %primary_addr,
                direction = direction.label(),
                bytes,
                "Session ended at stream EOF"
            );
        }
        Ok(RelayDone {
            bytes,
            result: Err(e),
        }) => {
            warn!(
                peer_addr = %peer_addr,
                primary = %primary_addr,
                direction = direction.label(),
                bytes,
                error = %e,
                "Session ended on stream error"
            );
        }
        Err(e) => {
            // A panicked relay ends only its own session.
            warn!(
                peer_addr = %peer_addr,
                primary = %primary_addr,
                direction = direction.label(),
                error = %e,
                "Relay task failed"
            );
        }
    }
}

/// Copy bytes from one stream half to the opposite one until the source
/// ends or either side errors. Epoch-unaware: it stops on its own stream
/// ending or on the owning session dropping its halves. Every relayed
/// chunk is counted into the direction's stats counter immediately, so
/// the tally survives a mid-transfer teardown.
async fn relay(
    mut src: OwnedReadHalf,
    mut dst: OwnedWriteHalf,
    direction: Direction,
    stats: Arc<ListenerStats>,
) -> RelayDone {
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut bytes = 0u64;

    let result = loop {
        match src.read(&mut buf).await {
            Ok(0) => {
                let _ = dst.shutdown().await;
                break Ok(());
            }
            Ok(n) => {
                if let Err(e) = dst.write_all(&buf[..n]).await {
                    break Err(e);
                }
                bytes += n as u64;
                direction.counter(&stats).fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => break Err(e),
        }
    };

    match &result {
        Ok(()) => debug!(direction = direction.label(), bytes, "Stream ended"),
        Err(e) => debug!(direction = direction.label(), bytes, error = %e, "Stream errored"),
    }

    RelayDone { bytes, result }
}
