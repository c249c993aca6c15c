//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Custom pricing can be added at runtime from TOML config
//! or from a JSON model registry file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use stepwise_core::Usage;

use crate::CostError;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// One entry of a JSON model registry file. Prices are per token.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    #[serde(default)]
    input_cost_per_token: f64,
    #[serde(default)]
    output_cost_per_token: f64,
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert("anthropic/claude-sonnet-4".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("anthropic/claude-opus-4".into(), ModelPricing::new(15.0, 75.0));
        prices.insert("anthropic/claude-3.5-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("anthropic/claude-3.5-haiku".into(), ModelPricing::new(0.8, 4.0));
        prices.insert("anthropic/claude-3-haiku".into(), ModelPricing::new(0.25, 1.25));

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("openai/gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("openai/gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("openai/gpt-4.1".into(), ModelPricing::new(2.0, 8.0));
        prices.insert("openai/gpt-4.1-mini".into(), ModelPricing::new(0.4, 1.6));
        prices.insert("openai/gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("openai/o1".into(), ModelPricing::new(15.0, 60.0));
        prices.insert("openai/o1-mini".into(), ModelPricing::new(3.0, 12.0));
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 4.4));

        // ── Google ─────────────────────────────────────────────────
        prices.insert("google/gemini-2.0-flash".into(), ModelPricing::new(0.1, 0.4));
        prices.insert("google/gemini-2.0-pro".into(), ModelPricing::new(1.25, 10.0));
        prices.insert("google/gemini-1.5-pro".into(), ModelPricing::new(1.25, 5.0));
        prices.insert("google/gemini-1.5-flash".into(), ModelPricing::new(0.075, 0.3));

        // ── Meta (via OpenRouter) ──────────────────────────────────
        prices.insert("meta-llama/llama-3.1-405b".into(), ModelPricing::new(2.7, 2.7));
        prices.insert("meta-llama/llama-3.1-70b".into(), ModelPricing::new(0.52, 0.75));
        prices.insert("meta-llama/llama-3.1-8b".into(), ModelPricing::new(0.055, 0.055));

        // ── Mistral ────────────────────────────────────────────────
        prices.insert("mistral/mistral-large".into(), ModelPricing::new(2.0, 6.0));
        prices.insert("mistral/mistral-small".into(), ModelPricing::new(0.2, 0.6));
        prices.insert("mistral/codestral".into(), ModelPricing::new(0.3, 0.9));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert("deepseek/deepseek-v3".into(), ModelPricing::new(0.27, 1.1));
        prices.insert("deepseek/deepseek-r1".into(), ModelPricing::new(0.55, 2.19));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model by exact name. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        prices.get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(model.into(), pricing);
    }

    /// Register every model of a JSON registry file.
    ///
    /// The file maps model names to per-token prices:
    /// `{"my-model": {"input_cost_per_token": 1e-6, "output_cost_per_token": 2e-6}}`.
    /// Returns the number of models registered.
    pub fn load_registry(&self, path: &Path) -> Result<usize, CostError> {
        let content = std::fs::read_to_string(path).map_err(|e| CostError::Registry {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let entries: HashMap<String, RegistryEntry> =
            serde_json::from_str(&content).map_err(|e| CostError::Registry {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let count = entries.len();
        for (name, entry) in entries {
            self.set(
                name,
                ModelPricing::new(
                    entry.input_cost_per_token * 1_000_000.0,
                    entry.output_cost_per_token * 1_000_000.0,
                ),
            );
        }
        tracing::debug!(path = %path.display(), count, "Registered custom model prices");
        Ok(count)
    }

    /// Find pricing for a model using flexible matching.
    ///
    /// Tries exact match first, then common provider prefixes
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest key whose bare name is
    /// a prefix of the bare model name (`gpt-4o-mini-2024-07-18` matches
    /// `gpt-4o-mini`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        // 1. Exact match
        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        // 2. Try with common provider prefixes
        const PREFIXES: [&str; 6] = ["openai", "anthropic", "google", "mistral", "deepseek", "meta-llama"];
        for prefix in PREFIXES {
            if let Some(p) = prices.get(&format!("{prefix}/{model}")) {
                return Some(*p);
            }
        }

        // 3. Prefix match on the bare model name
        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        // Longest bare key wins; equal lengths go to the smallest full key
        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), key, *pricing))
            })
            .max_by(|(len_a, key_a, _), (len_b, key_b, _)| {
                len_a.cmp(len_b).then_with(|| key_b.cmp(key_a))
            })
            .map(|(_, _, pricing)| pricing)
    }

    /// Cost of one completion, failing when it cannot be determined.
    ///
    /// `candidates` are tried in order (typically the configured model name
    /// and then the model the provider reports). The result is a pure
    /// function of its inputs. A cost that is not strictly positive counts
    /// as a failure.
    pub fn completion_cost(&self, candidates: &[&str], usage: Option<&Usage>) -> Result<f64, CostError> {
        let usage = usage.ok_or(CostError::MissingUsage)?;
        let pricing = candidates
            .iter()
            .find_map(|m| self.lookup(m))
            .ok_or_else(|| CostError::UnknownModel(candidates.join(", ")))?;

        let cost = pricing.cost(usage.prompt_tokens, usage.completion_tokens);
        if cost > 0.0 {
            Ok(cost)
        } else {
            Err(CostError::NonPositive(cost))
        }
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
