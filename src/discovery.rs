//! Sentinel discovery client.
//!
//! Asks the sentinel fleet which node is currently primary. The configured
//! sentinel host is re-resolved on every poll so fleet membership changes
//! behind a DNS name are picked up without restarts. A reported primary is
//! only returned after a connect probe confirms something is listening
//! there; the probe is best-effort and does not guarantee the node stays
//! reachable for the first real session.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{trace, warn};

/// Sentinel reply buffer size. The `get-master-addr-by-name` reply is a
/// two-element bulk array and always fits well inside this.
const REPLY_BUF_SIZE: usize = 256;

/// Discovery errors. All of them are recoverable at the tracker level.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The configured sentinel address did not resolve.
    #[error("failed to resolve sentinel '{0}': {1}")]
    Resolve(String, #[source] std::io::Error),
}

/// Per-sentinel query failures. Logged and skipped; never fatal to a poll.
#[derive(Debug, Error)]
enum QueryError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("i/o failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("i/o timed out")]
    IoTimeout,

    #[error("malformed reply: expected at least 5 CRLF segments, got {0}")]
    Malformed(usize),

    #[error("invalid port in reply: '{0}'")]
    InvalidPort(String),

    #[error("failed to resolve reported host '{0}': {1}")]
    HostResolve(String, #[source] std::io::Error),

    #[error("reported host '{0}' resolved to nothing")]
    HostUnresolved(String),
}

/// Ask the sentinel fleet for the current primary of `primary_name`.
///
/// Returns `Ok(None)` when no sentinel yields a parseable, reachable
/// candidate. Callers must treat that as "try again later" and keep
/// whatever primary they already know; a sentinel outage is not a
/// failover.
pub async fn find_primary(
    sentinel_addr: &str,
    primary_name: &str,
    io_timeout: Duration,
) -> Result<Option<SocketAddr>, DiscoveryError> {
    let sentinels = resolve_sentinels(sentinel_addr).await?;

    for sentinel in sentinels {
        let candidate = match query_sentinel(sentinel, primary_name, io_timeout).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(sentinel = %sentinel, error = %e, "Sentinel query failed");
                continue;
            }
        };

        // Connect-then-drop probe before trusting the answer.
        match timeout(io_timeout, TcpStream::connect(candidate)).await {
            Ok(Ok(_)) => return Ok(Some(candidate)),
            Ok(Err(e)) => {
                warn!(sentinel = %sentinel, primary = %candidate, error = %e, "Reported primary is unreachable");
            }
            Err(_) => {
                warn!(sentinel = %sentinel, primary = %candidate, "Reported primary did not accept in time");
            }
        }
    }

    Ok(None)
}

/// Resolve the configured `host:port` to the current set of sentinel
/// peers. Resolved fresh on every call, never cached.
async fn resolve_sentinels(sentinel_addr: &str) -> Result<Vec<SocketAddr>, DiscoveryError> {
    let addrs: Vec<SocketAddr> = lookup_host(sentinel_addr)
        .await
        .map_err(|e| DiscoveryError::Resolve(sentinel_addr.to_string(), e))?
        .collect();

    for addr in &addrs {
        trace!(sentinel = %addr, "Resolved sentinel");
    }

    Ok(addrs)
}

/// Query a single sentinel for the primary address.
async fn query_sentinel(
    sentinel: SocketAddr,
    primary_name: &str,
    io_timeout: Duration,
) -> Result<SocketAddr, QueryError> {
    let mut conn = timeout(io_timeout, TcpStream::connect(sentinel))
        .await
        .map_err(|_| QueryError::ConnectTimeout)?
        .map_err(QueryError::Connect)?;

    let command = format!("sentinel get-master-addr-by-name {primary_name}\n");
    timeout(io_timeout, conn.write_all(command.as_bytes()))
        .await
        .map_err(|_| QueryError::IoTimeout)?
        .map_err(QueryError::Io)?;

    let mut buf = [0u8; REPLY_BUF_SIZE];
    let n = timeout(io_timeout, conn.read(&mut buf))
        .await
        .map_err(|_| QueryError::IoTimeout)?
        .map_err(QueryError::Io)?;

    let reply = String::from_utf8_lossy(&buf[..n]);
    let (host, port) = parse_reply(&reply)?;
    resolve_reported(host, port).await
}

/// Parse a `get-master-addr-by-name` reply.
///
/// The reply is a two-element bulk array, for example
/// `*2\r\n$8\r\n10.0.0.1\r\n$4\r\n6380\r\n`: the host sits at CRLF
/// index 2 and the port at index 4. Anything shorter is malformed,
/// including error replies for an unknown primary name.
fn parse_reply(reply: &str) -> Result<(&str, u16), QueryError> {
    let parts: Vec<&str> = reply.split("\r\n").collect();
    if parts.len() < 5 {
        return Err(QueryError::Malformed(parts.len()));
    }

    let host = parts[2];
    let port = parts[4]
        .parse::<u16>()
        .map_err(|_| QueryError::InvalidPort(parts[4].to_string()))?;

    Ok((host, port))
}

/// Turn the reported host into a socket address. Sentinels usually report
/// a literal IP, but a hostname is resolved too.
async fn resolve_reported(host: &str, port: u16) -> Result<SocketAddr, QueryError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    lookup_host((host, port))
        .await
        .map_err(|e| QueryError::HostResolve(host.to_string(), e))?
        .next()
        .ok_or_else(|| QueryError::HostUnresolved(host.to_string()))
}
