//! Ratekeeper Binary
//!
//! Runs the rate refresh scheduler against the configured upstream until interrupted.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratekeeper_node::{HttpRateSource, NodeConfig, RateNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Ratekeeper");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let source = Arc::new(HttpRateSource::new(&config.upstream)?);
    let node = RateNode::new(config.clone(), source)?;

    node.start().await?;

    info!(
        upstream = %config.upstream.base_url,
        reference = %config.engine.reference_currency,
        currencies = config.engine.supported_currencies.len(),
        "Ratekeeper running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    node.stop().await?;

    info!("Ratekeeper shutdown complete");
    Ok(())
}
