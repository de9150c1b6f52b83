//! `dispatch config` — Configuration helpers.

use anyhow::Context;
use dispatch_config::AppConfig;

pub fn print_default() {
    println!("{}", AppConfig::default_toml());
}

pub fn path() {
    println!("{}", config_path().display());
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub fn validate() -> anyhow::Result<()> {
    println!("Validating {}", config_path().display());
    let config = AppConfig::load().context("Config error")?;

    println!("   Config parsed successfully");
    println!("   Default model: {}", config.default_model);
    for (name, endpoint) in &config.models {
        println!("   Model {name}: llm={} knowledge={}", endpoint.llm_url, endpoint.knowledge_url);
    }
    println!("   Gateway: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store: {}", config.store.backend);
    println!(
        "   Agent: {} iterations, {} token budget, {}s tool timeout",
        config.agent.max_iterations, config.agent.token_budget, config.agent.tool_timeout_secs
    );
    println!("   Lab topologies: {}", config.lab.topologies.len());
    Ok(())
}
