//! OpenAI-compatible chat completions adapter
//!
//! The request/response helpers here are shared with the other
//! chat-completions shaped backends (OpenRouter, generic chat).

use super::adapter::{select_fixed_model, AdapterSettings, ProviderAdapter};
use super::http::{openai_error_message, send_json, UpstreamFailure};
use super::{ModelRequest, ModelResponse, ProviderError, ProviderId, TokenUsage};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI chat completions API
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    settings: AdapterSettings,
}

impl OpenAiAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    /// Routed (`vendor/model`) and Anthropic model names are not served here
    fn accepts_model(model: &str) -> bool {
        !model.contains('/') && !model.starts_with("claude")
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn configured_model(&self) -> Option<String> {
        self.settings.configured_model()
    }

    async fn invoke(
        &self,
        request: &ModelRequest,
        model_override: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ProviderError> {
        let model = select_fixed_model(ProviderId::OpenAi, &self.settings, model_override, Self::accepts_model)?;
        let api_key = self.settings.credential.resolve()?;

        let body = chat_completion_body(&self.settings, request, &model, None);
        let url = format!("{}/chat/completions", self.settings.base_url(DEFAULT_BASE_URL));
        debug!("Calling OpenAI chat completions with model {}", model);

        let builder = self
            .settings
            .client
            .post(url)
            .bearer_auth(api_key.expose_secret())
            .json(&body);

        let value = send_json(builder, timeout, cancel)
            .await
            .map_err(|failure| classify_failure(ProviderId::OpenAi, failure))?;

        parse_chat_completion(ProviderId::OpenAi, &model, &value)
    }
}

/// Build a chat completions payload
pub(crate) fn chat_completion_body(
    settings: &AdapterSettings,
    request: &ModelRequest,
    model: &str,
    default_max_tokens: Option<u32>,
) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &request.messages {
        messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": settings.temperature(request),
    });

    if let Some(max_tokens) = settings.max_tokens(request).or(default_max_tokens) {
        body["max_tokens"] = json!(max_tokens);
    }

    if let Value::Object(map) = &mut body {
        for (key, value) in settings.merged_params(request) {
            map.entry(key).or_insert(value);
        }
    }

    body
}

/// Decode a chat completions response
pub(crate) fn parse_chat_completion(
    provider: ProviderId,
    requested_model: &str,
    value: &Value,
) -> Result<ModelResponse, ProviderError> {
    let choice = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| ProviderError::unknown(format!("Invalid {} response: missing choices", provider)))?;

    let content = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::unknown(format!("Invalid {} response: missing content", provider)))?;

    let usage = value.get("usage").map(|u| {
        let input = read_u32(u, "prompt_tokens");
        let output = read_u32(u, "completion_tokens");
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: u
                .get("total_tokens")
                .and_then(Value::as_u64)
                .map(|t| t.min(u32::MAX as u64) as u32)
                .unwrap_or(input.saturating_add(output)),
        }
    });

    Ok(ModelResponse {
        content: content.to_string(),
        model: value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        provider,
        usage,
        stop_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

pub(crate) fn read_u32(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// Classify a failure from an OpenAI-shaped backend
pub(crate) fn classify_failure(provider: ProviderId, failure: UpstreamFailure) -> ProviderError {
    match failure {
        UpstreamFailure::Status {
            status,
            retry_after,
            body,
        } => ProviderError::from_status(
            status,
            retry_after,
            format!("{} returned HTTP {}: {}", provider, status, openai_error_message(&body)),
        ),
        UpstreamFailure::TimedOut => ProviderError::timeout(format!("{} call timed out", provider)),
        UpstreamFailure::Unreachable(e) => {
            ProviderError::unavailable(format!("{} is unreachable: {}", provider, e))
        }
        UpstreamFailure::Transport(e) => {
            ProviderError::unknown(format!("{} request failed: {}", provider, e))
        }
        UpstreamFailure::Decode(e) => {
            ProviderError::unknown(format!("Failed to parse {} response: {}", provider, e))
        }
        UpstreamFailure::Cancelled => ProviderError::Cancelled,
    }
}
