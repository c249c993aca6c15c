//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks AI,
//! LiteLLM proxies and any endpoint exposing `/chat/completions`.
//!
//! Per-request overrides (`api_base`, `api_key`, `api_version`, `timeout`,
//! `extra`) from [`ProviderRequest`] take precedence over the provider's
//! own settings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, Role};
use stepwise_core::provider::*;
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// Build the JSON body for a completion request.
    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        if let Some(obj) = body.as_object_mut() {
            for (key, value) in &request.extra {
                obj.insert(key.clone(), value.clone());
            }
        }

        body
    }
}

/// Map a non-success HTTP status and body to a provider error.
pub(crate) fn classify_error(status: u16, body: &str) -> ProviderError {
    let lower = body.to_lowercase();
    match status {
        400 if lower.contains("context length")
            || lower.contains("context_length")
            || lower.contains("maximum context") =>
        {
            ProviderError::ContextWindowExceeded(body.to_string())
        }
        400 if lower.contains("unsupported") || lower.contains("unrecognized") => {
            ProviderError::UnsupportedParams(body.to_string())
        }
        401 => ProviderError::AuthenticationFailed(if body.is_empty() {
            "Invalid API key".into()
        } else {
            body.to_string()
        }),
        403 => ProviderError::PermissionDenied(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        500..=599 => ProviderError::ServerError {
            status_code: status,
            message: body.to_string(),
        },
        _ => ProviderError::ApiError {
            status_code: status,
            message: body.to_string(),
        },
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let base_url = request
            .api_base
            .as_deref()
            .map(|b| b.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        let url = format!("{base_url}/chat/completions");
        let api_key = request.api_key.as_deref().unwrap_or(&self.api_key);

        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, url = %url, "Sending completion request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        if !api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {api_key}"));
        }
        if let Some(version) = &request.api_version {
            builder = builder.query(&[("api-version", version.as_str())]);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(classify_error(status, &error_body));
        }

        let raw: serde_json::Value = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: status,
            message: format!("Failed to parse response: {e}"),
        })?;

        let api_response: ApiResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderError::ApiError {
                status_code: status,
                message: format!("Unexpected response shape: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: status,
                message: "No choices in response".into(),
            })?;

        let message = Message::new(Role::Assistant, choice.message.content.unwrap_or_default());

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let mut metadata = serde_json::Map::new();
        metadata.insert("response".into(), raw);

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model.unwrap_or_else(|| request.model.clone()),
            metadata,
        })
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
