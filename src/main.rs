//! sentinel-proxy
//!
//! Transparent TCP proxy that follows the primary of a sentinel-monitored
//! key-value cluster.
//!
//! This binary:
//! - Polls the sentinel fleet for the current primary address
//! - Accepts TCP connections and relays them byte-for-byte to the primary
//! - Forcibly closes every in-flight connection when the primary changes,
//!   so reconnecting clients land on the new primary

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sentinel_proxy::config::Config;
use sentinel_proxy::proxy::Listener;
use sentinel_proxy::tracker::{PrimaryState, PrimaryTracker};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to PROXY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting sentinel-proxy");
    info!(
        listen_addr = %config.listen_addr,
        sentinel_addr = %config.sentinel_addr,
        primary_name = %config.primary_name,
        "Configuration loaded"
    );

    let state = Arc::new(PrimaryState::new());

    let tracker = PrimaryTracker::new(Arc::clone(&state));
    let tracker_config = config.clone();
    tokio::spawn(async move {
        tracker.run(tracker_config).await;
    });

    // Run the accept loop for the process lifetime.
    let listener = Arc::new(Listener::bind(&config, state).await?);
    listener.run().await?;

    Ok(())
}
