//! Model-routing aggregator adapter (OpenRouter)
//!
//! The aggregator serves many vendors behind one endpoint, so every call
//! must name the model it wants.

use super::adapter::{AdapterSettings, ProviderAdapter};
use super::http::send_json;
use super::openai::{chat_completion_body, classify_failure, parse_chat_completion};
use super::{ModelRequest, ModelResponse, ProviderError, ProviderId};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_REFERER: &str = "https://aytch4k.com";
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Adapter for OpenRouter-style model routing
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    settings: AdapterSettings,
    app_title: String,
}

impl OpenRouterAdapter {
    /// `app_title` is sent as `X-Title` for attribution on the aggregator side
    pub fn new<S: Into<String>>(settings: AdapterSettings, app_title: S) -> Self {
        Self {
            settings,
            app_title: app_title.into(),
        }
    }

    fn select_model(&self, model_override: Option<&str>) -> Result<String, ProviderError> {
        model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| self.settings.configured_model())
            .ok_or_else(|| {
                ProviderError::invalid_request(
                    "the openrouter provider requires a model identifier on every call",
                )
            })
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouter
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
        let model = self.select_model(model_override)?;
        let api_key = self.settings.credential.resolve()?;

        let body = chat_completion_body(&self.settings, request, &model, Some(DEFAULT_MAX_TOKENS));
        let url = format!("{}/chat/completions", self.settings.base_url(DEFAULT_BASE_URL));
        debug!("Calling OpenRouter with model {}", model);

        let builder = self
            .settings
            .client
            .post(url)
            .bearer_auth(api_key.expose_secret())
            .header("HTTP-Referer", DEFAULT_REFERER)
            .header("X-Title", self.app_title.as_str())
            .json(&body);

        let value = send_json(builder, timeout, cancel)
            .await
            .map_err(|failure| classify_failure(ProviderId::OpenRouter, failure))?;

        parse_chat_completion(ProviderId::OpenRouter, &model, &value)
    }
}
