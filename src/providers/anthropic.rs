//! Anthropic messages API adapter

use super::adapter::{select_fixed_model, AdapterSettings, ProviderAdapter};
use super::http::{send_json, UpstreamFailure};
use super::openai::read_u32;
use super::{ChatRole, ModelRequest, ModelResponse, ProviderError, ProviderId, TokenUsage};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Adapter for the Anthropic messages API
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    settings: AdapterSettings,
}

impl AnthropicAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn accepts_model(model: &str) -> bool {
        model.starts_with("claude")
    }

    fn request_body(&self, request: &ModelRequest, model: &str) -> Value {
        // System prompts travel in a dedicated field, not as messages
        let mut system_parts: Vec<&str> = request.system.iter().map(String::as_str).collect();
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                role => messages.push(json!({ "role": role.as_str(), "content": message.content })),
            }
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.settings.max_tokens(request).unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": self.settings.temperature(request),
        });
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n\n"));
        }
        if let Value::Object(map) = &mut body {
            for (key, value) in self.settings.merged_params(request) {
                map.entry(key).or_insert(value);
            }
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
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
        let model = select_fixed_model(ProviderId::Anthropic, &self.settings, model_override, Self::accepts_model)?;
        let api_key = self.settings.credential.resolve()?;

        let body = self.request_body(request, &model);
        let url = format!("{}/messages", self.settings.base_url(DEFAULT_BASE_URL));
        debug!("Calling Anthropic messages with model {}", model);

        let builder = self
            .settings
            .client
            .post(url)
            .header("x-api-key", api_key.expose_secret().as_str())
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let value = send_json(builder, timeout, cancel).await.map_err(classify_failure)?;
        parse_response(&model, &value)
    }
}

fn parse_response(requested_model: &str, value: &Value) -> Result<ModelResponse, ProviderError> {
    let blocks = value
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::unknown("Invalid Anthropic response: missing content array"))?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(ProviderError::unknown("Invalid Anthropic response: no text content"));
    }

    let usage = value.get("usage").map(|u| {
        let input = read_u32(u, "input_tokens");
        let output = read_u32(u, "output_tokens");
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input.saturating_add(output),
        }
    });

    Ok(ModelResponse {
        content: text.join(""),
        model: value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        provider: ProviderId::Anthropic,
        usage,
        stop_reason: value
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Classify using Anthropic's typed error bodies, then the status code
fn classify_failure(failure: UpstreamFailure) -> ProviderError {
    match failure {
        UpstreamFailure::Status {
            status,
            retry_after,
            body,
        } => {
            let parsed: Option<Value> = serde_json::from_str(&body).ok();
            let error_type = parsed
                .as_ref()
                .and_then(|v| v.pointer("/error/type"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let detail = parsed
                .as_ref()
                .and_then(|v| v.pointer("/error/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status));
            let message = format!("anthropic returned HTTP {}: {}", status, detail);

            match error_type.as_str() {
                "authentication_error" | "permission_error" => ProviderError::auth(message),
                "rate_limit_error" => ProviderError::rate_limited(retry_after, message),
                "overloaded_error" | "api_error" => ProviderError::unavailable(message),
                "invalid_request_error" | "not_found_error" | "request_too_large" => {
                    ProviderError::invalid_request(message)
                }
                "timeout_error" => ProviderError::timeout(message),
                _ => ProviderError::from_status(status, retry_after, message),
            }
        }
        UpstreamFailure::TimedOut => ProviderError::timeout("anthropic call timed out"),
        UpstreamFailure::Unreachable(e) => ProviderError::unavailable(format!("anthropic is unreachable: {}", e)),
        UpstreamFailure::Transport(e) => ProviderError::unknown(format!("anthropic request failed: {}", e)),
        UpstreamFailure::Decode(e) => ProviderError::unknown(format!("Failed to parse anthropic response: {}", e)),
        UpstreamFailure::Cancelled => ProviderError::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, body: &str) -> UpstreamFailure {
        UpstreamFailure::Status {
            status: code,
            retry_after: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_typed_error_bodies_refine_status() {
        // Anthropic reports overload with a non-standard 529
        let overloaded = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(matches!(classify_failure(status(529, overloaded)), ProviderError::UpstreamUnavailable { .. }));

        let denied = r#"{"type":"error","error":{"type":"permission_error","message":"nope"}}"#;
        assert!(matches!(classify_failure(status(400, denied)), ProviderError::AuthError { .. }));

        assert!(matches!(classify_failure(status(429, "")), ProviderError::RateLimited { .. }));
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let value = json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "Hello, "}, {"type": "text", "text": "world"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        });
        let response = parse_response("claude-3-5-sonnet-20241022", &value).unwrap();
        assert_eq!(response.content, "Hello, world");
        assert_eq!(response.usage.unwrap().total_tokens, 7);
    }
}
