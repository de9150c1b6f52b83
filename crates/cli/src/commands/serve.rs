//! `dispatch serve` — Start the HTTP API server.

use anyhow::Context;
use dispatch_config::AppConfig;
use tracing::info;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    info!(
        host = %config.gateway.host,
        port = config.gateway.port,
        default_model = %config.default_model,
        store = %config.store.backend,
        store_path = %config.store.path,
        "Starting Dispatch gateway"
    );

    dispatch_gateway::start(config)
        .await
        .context("Gateway failed")?;

    Ok(())
}
