//! LLM provider implementations and the model query service for Stepwise.
//!
//! All providers implement the `stepwise_core::Provider` trait. The router
//! selects the provider for a model name; [`LlmModel`] adds retries and
//! cost accounting on top and implements `stepwise_core::Model`.

pub mod model;
pub mod openai_compat;
pub mod retry;
pub mod router;

pub use model::{LlmModel, PLACEHOLDER_API_KEY, pricing_for};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use router::{ProviderRouter, Route, build_from_config, parse_provider_model};
