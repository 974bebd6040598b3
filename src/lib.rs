//! Failover-aware TCP proxy for a sentinel-monitored key-value cluster.
//!
//! The proxy:
//! - Polls the sentinel fleet for the current primary address
//! - Forwards accepted client connections to whichever node is primary
//! - Forcibly closes every in-flight connection when the primary changes,
//!   so reconnecting clients are routed to the new primary instead of
//!   silently talking to a demoted node

pub mod config;
pub mod discovery;
pub mod proxy;
pub mod tracker;

pub use config::Config;
pub use discovery::{find_primary, DiscoveryError};
pub use proxy::{Listener, ListenerStats};
pub use tracker::{PrimaryEpoch, PrimaryState, PrimaryTracker};
