//! Model trait: what the agent loop needs from a language model.
//!
//! A [`Provider`](crate::provider::Provider) performs one raw completion.
//! A `Model` wraps that with everything the loop relies on: retries, cost
//! accounting and call statistics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;

/// The reply of one successful model query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text ("" when the provider returned no content)
    pub content: String,

    /// Raw provider payload and other per-call details
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A language model as seen by the agent loop.
///
/// `cost()` and `n_calls()` never decrease over the lifetime of an instance,
/// and a failed `query` leaves both unchanged.
#[async_trait]
pub trait Model: Send + Sync {
    /// Configured model identifier (as written in config, provider prefix included).
    fn model_name(&self) -> &str;

    /// Query the model with the full conversation.
    async fn query(&mut self, messages: &[Message]) -> Result<ModelResponse>;

    /// Accumulated cost of all successful queries, in USD.
    fn cost(&self) -> f64;

    /// Number of successful queries.
    fn n_calls(&self) -> u64;

    /// Variables exposed to prompt templates.
    fn template_vars(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("model_name".into(), self.model_name().into());
        vars.insert("n_model_calls".into(), self.n_calls().into());
        vars.insert("model_cost".into(), self.cost().into());
        vars
    }
}
