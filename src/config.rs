//! Proxy configuration (env-driven).
//!
//! Configuration problems are the only fatal errors in this process:
//! a missing primary name or an unparseable listen address aborts startup
//! before any loop runs. Everything after startup is logged and retried.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result};

/// Default steady-state sentinel poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default backoff after a failed poll, or while no primary is known yet.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default connect/read timeout for sentinel queries and primary probes.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Default connect timeout when dialing the primary for a session.
///
/// Intentionally shorter than the discovery timeout: a slow primary should
/// fail the client quickly rather than stall it.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(50);

/// Default maximum concurrent proxied connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local address to accept client connections on.
    pub listen_addr: SocketAddr,

    /// Sentinel `host:port`. The host may resolve to multiple sentinel
    /// peers; it is re-resolved on every poll.
    pub sentinel_addr: String,

    /// Logical name of the monitored primary. Required.
    pub primary_name: String,

    /// Steady-state sentinel poll interval.
    pub poll_interval: Duration,

    /// Backoff after a failed poll or before the first primary is known.
    pub retry_interval: Duration,

    /// Connect/read timeout for sentinel queries and primary probes.
    pub discovery_timeout: Duration,

    /// Connect timeout when dialing the primary for a session.
    pub dial_timeout: Duration,

    /// Maximum concurrent proxied connections.
    pub max_connections: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_raw =
            std::env::var("PROXY_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:9999".to_string());
        let listen_addr = resolve_listen_addr(&listen_raw)?;

        let sentinel_addr = std::env::var("PROXY_SENTINEL_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:26379".to_string());

        let primary_name = std::env::var("PROXY_PRIMARY_NAME").context(
            "Missing primary name. Set PROXY_PRIMARY_NAME to the monitored primary's logical name.",
        )?;
        if primary_name.trim().is_empty() {
            anyhow::bail!("PROXY_PRIMARY_NAME must not be empty.");
        }

        let poll_interval = duration_var("PROXY_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL)?;
        let retry_interval = duration_var("PROXY_RETRY_INTERVAL_MS", DEFAULT_RETRY_INTERVAL)?;
        let discovery_timeout =
            duration_var("PROXY_DISCOVERY_TIMEOUT_MS", DEFAULT_DISCOVERY_TIMEOUT)?;
        let dial_timeout = duration_var("PROXY_DIAL_TIMEOUT_MS", DEFAULT_DIAL_TIMEOUT)?;

        let max_connections: usize = std::env::var("PROXY_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("PROXY_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let log_level = std::env::var("PROXY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            sentinel_addr,
            primary_name,
            poll_interval,
            retry_interval,
            discovery_timeout,
            dial_timeout,
            max_connections,
            log_level,
        })
    }
}

fn duration_var(name: &str, default: Duration) -> Result<Duration> {
    let ms: Option<u64> = std::env::var(name)
        .ok()
        .map(|v| v.parse())
        .transpose()
        .with_context(|| format!("{name} must be an integer (milliseconds)."))?;

    Ok(ms.map(Duration::from_millis).unwrap_or(default))
}

/// Turn the configured listen address into a socket address. A literal
/// `ip:port` parses directly; a hostname form like `localhost:9999` goes
/// through the resolver before being declared fatal.
fn resolve_listen_addr(raw: &str) -> Result<SocketAddr> {
    if let Ok(addr) = raw.parse() {
        return Ok(addr);
    }

    raw.to_socket_addrs()
        .with_context(|| format!("Failed to resolve listen address '{raw}'"))?
        .next()
        .with_context(|| format!("Listen address '{raw}' resolved to nothing"))
}
