//! The model query service.
//!
//! [`LlmModel`] turns one conversation into one completion: it resolves the
//! provider, applies endpoint overrides, retries transient failures with
//! backoff, prices the call and updates both its own counters and the
//! process-wide [`GlobalModelStats`](stepwise_telemetry::GlobalModelStats).

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_config::{CostTracking, ModelConfig};
use stepwise_core::error::{Error, ProviderError, Result};
use stepwise_core::message::Message;
use stepwise_core::model::{Model, ModelResponse};
use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
use stepwise_telemetry::{ModelPricing, PricingTable, SharedModelStats};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::router::{ProviderRouter, Route, build_from_config};

/// Key sent to custom endpoints that were configured without one.
pub const PLACEHOLDER_API_KEY: &str = "sk-proxy-placeholder";

/// A language model backed by an OpenAI-compatible provider.
pub struct LlmModel {
    config: ModelConfig,
    router: ProviderRouter,
    pricing: Arc<PricingTable>,
    retry: RetryPolicy,
    stats: SharedModelStats,
    interrupt: Option<watch::Receiver<bool>>,
    cost: f64,
    n_calls: u64,
}

impl LlmModel {
    /// Create a model from explicit parts.
    pub fn new(
        config: ModelConfig,
        router: ProviderRouter,
        pricing: Arc<PricingTable>,
        stats: SharedModelStats,
    ) -> Self {
        if let Some(base) = &config.api_base {
            info!(api_base = %base, "Using custom API base");
        }
        if config.api_key.is_some() {
            debug!("Using configured API key");
        }

        let retry = RetryPolicy::with_max_attempts(config.retry_attempts());
        Self {
            config,
            router,
            pricing,
            retry,
            stats,
            interrupt: None,
            cost: 0.0,
            n_calls: 0,
        }
    }

    /// Build the provider router and pricing table from configuration.
    pub fn from_config(config: ModelConfig, stats: SharedModelStats) -> Result<Self> {
        let router = build_from_config(&config)?;
        let pricing = Arc::new(pricing_for(&config)?);
        Ok(Self::new(config, router, pricing, stats))
    }

    /// Abort in-flight queries when the receiver observes `true`.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn build_request(&self, route: &Route, messages: &[Message]) -> ProviderRequest {
        let kwargs = &self.config.model_kwargs;

        let mut request = ProviderRequest::new(
            route.model.clone(),
            messages
                .iter()
                .map(|m| Message::new(m.role, m.content.clone()))
                .collect(),
        );
        request.provider = route.provider_name.clone();
        request.temperature = kwargs.temperature;
        request.max_tokens = kwargs.max_tokens;
        request.extra = kwargs.extra.clone();
        request.api_base = self.config.api_base.clone();
        request.api_key = self.config.api_key.clone();
        request.api_version = self.config.api_version.clone();
        request.timeout = Some(std::time::Duration::from_secs(self.config.timeout_secs()));

        if let Some(provider) = &route.provider_name {
            debug!(provider = %provider, model = %route.model, "Using explicit provider");
        }

        if request.api_base.is_some() && request.api_key.is_none() {
            request.api_key = Some(PLACEHOLDER_API_KEY.into());
            debug!("Injected placeholder API key for custom endpoint");
        }

        request
    }

    /// Add the endpoint and a remediation hint to authentication failures.
    fn augment_auth_error(&self, err: ProviderError) -> ProviderError {
        match err {
            ProviderError::AuthenticationFailed(mut message) => {
                if let Some(base) = &self.config.api_base {
                    message.push_str(&format!(" (API Base: {base})"));
                }
                message.push_str(
                    " Set STEPWISE_API_KEY env var or add api_key to the [model] section of your profile.",
                );
                ProviderError::AuthenticationFailed(message)
            }
            other => other,
        }
    }

    /// Cost of one response under the configured cost tracking mode.
    fn price(&self, response: &ProviderResponse) -> Result<f64> {
        let model_name = self.config.model_name();
        let candidates = [model_name, response.model.as_str()];

        match self.pricing.completion_cost(&candidates, response.usage.as_ref()) {
            Ok(cost) => Ok(cost),
            Err(e) => match self.config.cost_tracking() {
                CostTracking::IgnoreErrors => {
                    debug!(model = %model_name, error = %e, "Ignoring cost computation failure");
                    Ok(0.0)
                }
                CostTracking::Default => {
                    let msg = format!(
                        "Error calculating cost for model {model_name}: {e}. \
                         Set cost_tracking = \"ignore_errors\" in config or \
                         export STEPWISE_COST_TRACKING=ignore_errors to ignore."
                    );
                    error!("{msg}");
                    Err(Error::CostTracking(msg))
                }
            },
        }
    }
}

/// Build the pricing table: built-in prices, then the registry file, then
/// `[model.pricing]` overrides.
pub fn pricing_for(config: &ModelConfig) -> Result<PricingTable> {
    let table = PricingTable::with_defaults();

    if let Some(path) = &config.model_registry {
        if path.is_file() {
            table.load_registry(path).map_err(|e| Error::Config {
                message: e.to_string(),
            })?;
        } else {
            debug!(path = %path.display(), "Model registry file not found, skipping");
        }
    }

    for (name, price) in &config.pricing {
        table.set(name.clone(), ModelPricing::new(price.input_per_m, price.output_per_m));
    }

    Ok(table)
}

/// One provider call that yields early when the interrupt flag is raised.
async fn call_once(
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
    interrupt: Option<watch::Receiver<bool>>,
) -> std::result::Result<ProviderResponse, ProviderError> {
    let Some(mut rx) = interrupt else {
        return provider.complete(request).await;
    };

    if *rx.borrow() {
        return Err(ProviderError::Interrupted);
    }

    tokio::select! {
        result = provider.complete(request) => result,
        Ok(_) = rx.wait_for(|interrupted| *interrupted) => Err(ProviderError::Interrupted),
    }
}

#[async_trait]
impl Model for LlmModel {
    fn model_name(&self) -> &str {
        self.config.model_name()
    }

    async fn query(&mut self, messages: &[Message]) -> Result<ModelResponse> {
        let route = self.router.resolve(self.config.model_name())?;
        let request = self.build_request(&route, messages);
        let interrupt = self.interrupt.clone();

        let result = retry_with_backoff(&self.retry, interrupt.clone(), |_| {
            call_once(route.provider.clone(), request.clone(), interrupt.clone())
        })
        .await;

        let response = result.map_err(|e| self.augment_auth_error(e))?;
        let cost = self.price(&response)?;

        self.n_calls += 1;
        self.cost += cost;
        self.stats.add(cost);

        debug!(
            model = %self.config.model_name(),
            cost,
            total_cost = self.cost,
            n_calls = self.n_calls,
            "Model query complete"
        );

        let mut extra = response.metadata;
        if let Some(usage) = &response.usage {
            extra.insert("usage".into(), serde_json::to_value(usage)?);
        }

        Ok(ModelResponse {
            content: response.message.content,
            extra,
        })
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn n_calls(&self) -> u64 {
        self.n_calls
    }

    fn template_vars(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("model_name".into(), self.config.model_name().into());
        vars.insert("n_model_calls".into(), self.n_calls.into());
        vars.insert("model_cost".into(), self.cost.into());
        if let Some(base) = &self.config.api_base {
            vars.insert("api_base".into(), base.clone().into());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use stepwise_core::Usage;
    use stepwise_telemetry::GlobalModelStats;

    type Reply = std::result::Result<ProviderResponse, ProviderError>;

    /// Returns scripted replies in order and records every request.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> ProviderRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Reply {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())))
        }
    }

    /// Never answers.
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Reply {
            std::future::pending().await
        }
    }

    fn reply(content: &str, prompt: u32, completion: u32) -> Reply {
        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage: Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            model: "gpt-4o".into(),
            metadata: serde_json::Map::new(),
        })
    }

    fn config(model: &str) -> ModelConfig {
        ModelConfig {
            model_name: Some(model.into()),
            ..Default::default()
        }
    }

    fn model_with(
        config: ModelConfig,
        provider_name: &str,
        provider: Arc<dyn Provider>,
        stats: SharedModelStats,
    ) -> LlmModel {
        let mut router = ProviderRouter::new("openai");
        router.register(provider_name, provider);
        LlmModel::new(config, router, Arc::new(PricingTable::with_defaults()), stats)
    }

    #[tokio::test]
    async fn query_accumulates_cost_and_calls() {
        let provider = ScriptedProvider::new(vec![reply("one", 1000, 100), reply("two", 2000, 200)]);
        let stats = GlobalModelStats::shared();
        let mut model = model_with(config("gpt-4o"), "openai", provider.clone(), stats.clone());

        let first = model.query(&[Message::user("hi")]).await.unwrap();
        assert_eq!(first.content, "one");
        let after_first = model.cost();

        model.query(&[Message::user("again")]).await.unwrap();

        let table = PricingTable::with_defaults();
        let gpt4o = table.lookup("gpt-4o").unwrap();
        let expected = gpt4o.cost(1000, 100) + gpt4o.cost(2000, 200);
        assert!(after_first > 0.0);
        assert!(model.cost() > after_first);
        assert!((model.cost() - expected).abs() < 1e-12);
        assert_eq!(model.n_calls(), 2);
        assert_eq!(stats.n_calls(), 2);
        assert!((stats.cost() - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn global_stats_are_shared_between_models() {
        let stats = GlobalModelStats::shared();
        let mut a = model_with(
            config("gpt-4o"),
            "openai",
            ScriptedProvider::new(vec![reply("a", 100, 10)]),
            stats.clone(),
        );
        let mut b = model_with(
            config("gpt-4o"),
            "openai",
            ScriptedProvider::new(vec![reply("b", 100, 10)]),
            stats.clone(),
        );

        a.query(&[]).await.unwrap();
        b.query(&[]).await.unwrap();

        assert_eq!(stats.n_calls(), 2);
        assert!((stats.cost() - (a.cost() + b.cost())).abs() < 1e-12);
    }

    #[tokio::test]
    async fn cost_failure_is_fatal_by_default() {
        let provider = ScriptedProvider::new(vec![reply("free?", 0, 0)]);
        let stats = GlobalModelStats::shared();
        let mut model = model_with(config("gpt-4o"), "openai", provider.clone(), stats.clone());

        let err = model.query(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, Error::CostTracking(_)));
        assert!(err.to_string().contains("ignore_errors"));
        assert_eq!(provider.calls(), 1);
        assert_eq!(model.n_calls(), 0);
        assert_eq!(model.cost(), 0.0);
        assert_eq!(stats.n_calls(), 0);
    }

    #[tokio::test]
    async fn cost_failure_ignored_when_configured() {
        let provider = ScriptedProvider::new(vec![reply("free", 0, 0)]);
        let mut cfg = config("gpt-4o");
        cfg.cost_tracking = Some(CostTracking::IgnoreErrors);
        let stats = GlobalModelStats::shared();
        let mut model = model_with(cfg, "openai", provider, stats.clone());

        model.query(&[Message::user("hi")]).await.unwrap();
        assert_eq!(model.n_calls(), 1);
        assert_eq!(model.cost(), 0.0);
        assert_eq!(stats.n_calls(), 1);
    }

    #[tokio::test]
    async fn placeholder_key_injected_for_custom_endpoint() {
        let provider = ScriptedProvider::new(vec![reply("ok", 10, 10)]);
        let mut cfg = config("gpt-4o");
        cfg.api_base = Some("http://localhost:8080/v1".into());
        let mut model = model_with(cfg, "openai", provider.clone(), GlobalModelStats::shared());

        model.query(&[Message::user("hi")]).await.unwrap();
        let request = provider.last_request();
        assert_eq!(request.api_key.as_deref(), Some(PLACEHOLDER_API_KEY));
        assert_eq!(request.api_base.as_deref(), Some("http://localhost:8080/v1"));
    }

    #[tokio::test]
    async fn configured_key_is_not_replaced() {
        let provider = ScriptedProvider::new(vec![reply("ok", 10, 10)]);
        let mut cfg = config("gpt-4o");
        cfg.api_base = Some("http://localhost:8080/v1".into());
        cfg.api_key = Some("sk-real".into());
        let mut model = model_with(cfg, "openai", provider.clone(), GlobalModelStats::shared());

        model.query(&[]).await.unwrap();
        assert_eq!(provider.last_request().api_key.as_deref(), Some("sk-real"));
    }

    #[tokio::test]
    async fn request_carries_parameters_and_provider() {
        let provider = ScriptedProvider::new(vec![reply("ok", 10, 10)]);
        let mut cfg = config("openrouter/gpt-4o");
        cfg.model_kwargs.temperature = Some(0.0);
        cfg.model_kwargs.max_tokens = Some(512);
        cfg.api_version = Some("2024-02-01".into());
        let mut model = model_with(cfg, "openrouter", provider.clone(), GlobalModelStats::shared());

        model.query(&[Message::system("sys"), Message::user("hi")]).await.unwrap();
        let request = provider.last_request();
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.provider.as_deref(), Some("openrouter"));
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.api_version.as_deref(), Some("2024-02-01"));
        assert_eq!(request.timeout, Some(std::time::Duration::from_secs(120)));
        assert_eq!(request.messages.len(), 2);
        assert!(request.api_key.is_none());
    }

    #[tokio::test]
    async fn auth_failure_is_augmented_and_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed(
            "Invalid API key".into(),
        ))]);
        let mut cfg = config("gpt-4o");
        cfg.api_base = Some("http://proxy:4000".into());
        let mut model = model_with(cfg, "openai", provider.clone(), GlobalModelStats::shared());

        let err = model.query(&[]).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid API key"));
        assert!(msg.contains("(API Base: http://proxy:4000)"));
        assert!(msg.contains("STEPWISE_API_KEY"));
        assert_eq!(err.kind(), "AuthenticationError");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited {
                retry_after_secs: 1,
            }),
            Err(ProviderError::Timeout("slow".into())),
            reply("finally", 10, 10),
        ]);
        let stats = GlobalModelStats::shared();
        let mut model = model_with(config("gpt-4o"), "openai", provider.clone(), stats.clone());

        let response = model.query(&[]).await.unwrap();
        assert_eq!(response.content, "finally");
        assert_eq!(provider.calls(), 3);
        assert_eq!(model.n_calls(), 1);
        assert_eq!(stats.n_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_leave_counters_unchanged() {
        let provider = ScriptedProvider::new(vec![]);
        let mut cfg = config("gpt-4o");
        cfg.retry_attempts = Some(4);
        let mut model = model_with(cfg, "openai", provider.clone(), GlobalModelStats::shared());

        let err = model.query(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Network(_))));
        assert_eq!(provider.calls(), 4);
        assert_eq!(model.n_calls(), 0);
        assert_eq!(model.cost(), 0.0);
    }

    #[tokio::test]
    async fn interrupt_aborts_inflight_query() {
        let (tx, rx) = watch::channel(false);
        let mut model = model_with(
            config("gpt-4o"),
            "openai",
            Arc::new(HangingProvider),
            GlobalModelStats::shared(),
        )
        .with_interrupt(rx);

        let handle = tokio::spawn(async move {
            let result = model.query(&[]).await;
            (result, model.n_calls())
        });
        tx.send(true).unwrap();

        let (result, n_calls) = handle.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "KeyboardInterrupt");
        assert_eq!(n_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_backoff_returns_promptly() {
        let (tx, rx) = watch::channel(false);
        let provider = ScriptedProvider::new(vec![]);
        let mut model = model_with(
            config("gpt-4o"),
            "openai",
            provider.clone(),
            GlobalModelStats::shared(),
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 10,
            multiplier: 60.0,
            min_wait: Duration::from_secs(60),
            max_wait: Duration::from_secs(60),
        })
        .with_interrupt(rx);

        let handle = tokio::spawn(async move { model.query(&[]).await.map(|_| ()) });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let interrupted_at = tokio::time::Instant::now();
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "KeyboardInterrupt");
        assert!(interrupted_at.elapsed() < Duration::from_secs(1));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_provider_prefix_is_an_error() {
        let provider = ScriptedProvider::new(vec![reply("ok", 1, 1)]);
        let mut model = model_with(config("acme/model"), "openai", provider, GlobalModelStats::shared());
        let err = model.query(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn pricing_overrides_apply() {
        let mut cfg = config("local/coder");
        cfg.pricing.insert(
            "local/coder".into(),
            stepwise_config::PriceOverride {
                input_per_m: 1.0,
                output_per_m: 1.0,
            },
        );
        let table = pricing_for(&cfg).unwrap();
        assert!((table.lookup("local/coder").unwrap().cost(1_000_000, 0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn template_vars_expose_counters() {
        let model = model_with(
            config("gpt-4o"),
            "openai",
            ScriptedProvider::new(vec![]),
            GlobalModelStats::shared(),
        );
        let vars = model.template_vars();
        assert_eq!(vars["model_name"], "gpt-4o");
        assert_eq!(vars["n_model_calls"], 0);
        assert_eq!(vars["model_cost"], 0.0);
    }
}
