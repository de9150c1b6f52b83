//! Model router — maps a model selector to its completion provider.
//!
//! Every configured model gets its own OpenAI-compatible provider pointed
//! at that model's server. Unknown selectors resolve to `None`; the HTTP
//! layer turns that into a 400.

use crate::knowledge::LightRagClient;
use crate::openai_compat::OpenAiCompatProvider;
use dispatch_core::provider::Provider;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Routes model selectors to providers.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_model: String,
}

impl ProviderRouter {
    /// Create an empty router with a default model.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_model: default_model.into(),
        }
    }

    /// Register a provider for a model.
    pub fn register(&mut self, model: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(model.into(), provider);
    }

    /// Get the provider of the default model.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_model).cloned()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Get the provider serving a model.
    pub fn get(&self, model: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(model).cloned()
    }

    pub fn contains(&self, model: &str) -> bool {
        self.providers.contains_key(model)
    }

    /// List all routable model names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build one provider per configured model.
pub fn build_from_config(config: &dispatch_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_model);

    for (model, endpoint) in &config.models {
        // Local servers accept any key
        let api_key = endpoint.api_key.clone().unwrap_or_else(|| "secret".into());
        let provider = OpenAiCompatProvider::new(model, &endpoint.llm_url, api_key)
            .with_completion_timeout(config.agent.completion_timeout());
        router.register(model.clone(), Arc::new(provider));
    }

    router
}

/// Build the knowledge client from configured model endpoints.
pub fn knowledge_from_config(config: &dispatch_config::AppConfig) -> LightRagClient {
    let endpoints: BTreeMap<String, String> = config
        .models
        .iter()
        .map(|(model, endpoint)| (model.clone(), endpoint.knowledge_url.clone()))
        .collect();
    LightRagClient::new(endpoints)
}
