//! Provider router: selects the LLM provider for a model name.
//!
//! A model name `"<provider>/<model>"` selects the provider explicitly; a
//! bare name uses the router's default provider.

use std::collections::HashMap;
use std::sync::Arc;

use stepwise_core::error::ProviderError;
use stepwise_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// Provider used for bare model names.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Split `"provider/model"` on the first `/`.
///
/// `"openrouter/anthropic/claude-sonnet-4"` gives
/// `("anthropic/claude-sonnet-4", Some("openrouter"))`.
pub fn parse_provider_model(model_name: &str) -> (&str, Option<&str>) {
    match model_name.split_once('/') {
        Some((provider, model)) => (model, Some(provider)),
        None => (model_name, None),
    }
}

/// A resolved provider together with the model name to send it.
#[derive(Clone)]
pub struct Route {
    pub provider: Arc<dyn Provider>,
    pub provider_name: Option<String>,
    pub model: String,
}

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve the provider for a model name.
    pub fn resolve(&self, model_name: &str) -> Result<Route, ProviderError> {
        let (model, provider_name) = parse_provider_model(model_name);

        let provider = match provider_name {
            Some(name) => self.get(name),
            None => self.default(),
        }
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no provider registered for '{}'",
                provider_name.unwrap_or(self.default_provider.as_str())
            ))
        })?;

        Ok(Route {
            provider,
            provider_name: provider_name.map(String::from),
            model: model.to_string(),
        })
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build the router for a model configuration.
///
/// The provider named by the model prefix (or the default provider) is
/// registered with the configured endpoint, else its well-known one. Its
/// key is the configured key, else `<PROVIDER>_API_KEY` from the
/// environment.
pub fn build_from_config(
    config: &stepwise_config::ModelConfig,
) -> Result<ProviderRouter, ProviderError> {
    let (_, provider_name) = parse_provider_model(config.model_name());
    let name = provider_name.unwrap_or(DEFAULT_PROVIDER);

    let base_url = config
        .api_base
        .clone()
        .or_else(|| default_base_url(name))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no endpoint known for provider '{name}'; set api_base or STEPWISE_API_BASE"
            ))
        })?;

    let api_key = config
        .api_key
        .clone()
        .or_else(|| std::env::var(provider_key_var(name)).ok())
        .unwrap_or_default();

    let mut router = ProviderRouter::new(name);
    router.register(
        name,
        Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)),
    );
    Ok(router)
}

/// Environment variable holding a provider's own key, e.g. `OPENAI_API_KEY`.
fn provider_key_var(provider_name: &str) -> String {
    format!(
        "{}_API_KEY",
        provider_name.to_uppercase().replace(['-', '.'], "_")
    )
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "mistral" => "https://api.mistral.ai/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.into())
}
