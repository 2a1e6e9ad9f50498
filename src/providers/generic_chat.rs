//! Generic chat backend adapter (NinjaChat-style)
//!
//! Posts a chat completions payload directly to the configured endpoint and
//! accepts the common response layouts such backends return.

use super::adapter::{AdapterSettings, ProviderAdapter};
use super::http::send_json;
use super::openai::{chat_completion_body, classify_failure, parse_chat_completion};
use super::{ModelRequest, ModelResponse, ProviderError, ProviderId};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.ninjachat.ai/api/chat";
pub const FALLBACK_MODEL: &str = "default-model";
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Adapter for a generic chat endpoint
#[derive(Debug, Clone)]
pub struct GenericChatAdapter {
    settings: AdapterSettings,
}

impl GenericChatAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ProviderAdapter for GenericChatAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::GenericChat
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
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| self.settings.configured_model())
            .unwrap_or_else(|| FALLBACK_MODEL.to_string());
        let api_key = self.settings.credential.resolve()?;

        let body = chat_completion_body(&self.settings, request, &model, Some(DEFAULT_MAX_TOKENS));
        let url = self.settings.base_url(DEFAULT_BASE_URL);
        debug!("Calling generic chat backend at {} with model {}", url, model);

        let builder = self
            .settings
            .client
            .post(url)
            .bearer_auth(api_key.expose_secret())
            .json(&body);

        let value = send_json(builder, timeout, cancel)
            .await
            .map_err(|failure| classify_failure(ProviderId::GenericChat, failure))?;

        parse_generic_response(&model, &value)
    }
}

/// Chat completions layout first, then `{message: {content}}`, `{response}` or `{content}`
fn parse_generic_response(model: &str, value: &Value) -> Result<ModelResponse, ProviderError> {
    if value.get("choices").is_some() {
        return parse_chat_completion(ProviderId::GenericChat, model, value);
    }

    let content = value
        .pointer("/message/content")
        .or_else(|| value.get("response"))
        .or_else(|| value.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::unknown("Invalid generic-chat response: no content field"))?;

    Ok(ModelResponse {
        content: content.to_string(),
        model: value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        provider: ProviderId::GenericChat,
        usage: None,
        stop_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_generic_layouts() {
        let ollama_like = json!({"message": {"role": "assistant", "content": "hi"}});
        assert_eq!(parse_generic_response("m", &ollama_like).unwrap().content, "hi");

        let flat = json!({"response": "flat"});
        assert_eq!(parse_generic_response("m", &flat).unwrap().content, "flat");

        let completions = json!({"choices": [{"message": {"content": "cc"}}]});
        assert_eq!(parse_generic_response("m", &completions).unwrap().content, "cc");

        assert!(parse_generic_response("m", &json!({"status": "ok"})).is_err());
    }
}
