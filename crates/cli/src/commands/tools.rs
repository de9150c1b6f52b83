//! `dispatch tools` — Print the tool catalog as the model sees it.

use anyhow::Context;
use dispatch_config::AppConfig;
use dispatch_core::tool::ToolDefinition;
use std::sync::Arc;

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let catalog = adapted_catalog(&config);
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

fn adapted_catalog(config: &AppConfig) -> Vec<ToolDefinition> {
    let knowledge = Arc::new(dispatch_providers::knowledge_from_config(config));
    let lab = Arc::new(dispatch_tools::SimulatedLab::from_config(&config.lab));
    let registry = dispatch_tools::default_registry(lab.clone(), lab, knowledge);
    dispatch_agent::adapt_catalog(&registry.definitions())
}
