//! Provider adapter contract

use super::credentials::Credential;
use super::{ModelRequest, ModelResponse, ProviderError, ProviderId};
use crate::config::ProviderDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Normalization layer for one upstream LLM backend
///
/// An adapter performs exactly one outbound call per `invoke` and never
/// retries; retry policy belongs to the registry. Implementations must check
/// `cancel` before the call and abandon the call promptly once it fires.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Backend identifier
    fn id(&self) -> ProviderId;

    /// Model used when the caller gives no override
    fn configured_model(&self) -> Option<String>;

    /// Invoke the backend once
    async fn invoke(
        &self,
        request: &ModelRequest,
        model_override: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ProviderError>;
}

/// Settings shared by the HTTP-backed adapters
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub descriptor: ProviderDescriptor,
    pub credential: Credential,
    pub client: reqwest::Client,
}

impl AdapterSettings {
    pub fn new(descriptor: ProviderDescriptor, credential: Credential, client: reqwest::Client) -> Self {
        Self {
            descriptor,
            credential,
            client,
        }
    }

    /// Configured endpoint without a trailing slash
    pub fn base_url(&self, default: &str) -> String {
        self.descriptor
            .base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// Descriptor model, falling back to the descriptor's model variable
    pub fn configured_model(&self) -> Option<String> {
        self.descriptor
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                self.descriptor
                    .model_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok())
                    .filter(|m| !m.trim().is_empty())
            })
    }

    /// Descriptor defaults overlaid with per-request parameters
    pub fn merged_params(&self, request: &ModelRequest) -> Map<String, Value> {
        let mut params = self.descriptor.additional_params.clone();
        for (key, value) in &request.params {
            params.insert(key.clone(), value.clone());
        }
        params
    }

    pub fn temperature(&self, request: &ModelRequest) -> f32 {
        request
            .temperature
            .or(self.descriptor.temperature)
            .unwrap_or(0.7)
    }

    pub fn max_tokens(&self, request: &ModelRequest) -> Option<u32> {
        request.max_tokens.or(self.descriptor.max_tokens)
    }
}

/// Pick the model for a fixed-backend provider
pub(crate) fn select_fixed_model(
    provider: ProviderId,
    settings: &AdapterSettings,
    model_override: Option<&str>,
    accepts: fn(&str) -> bool,
) -> Result<String, ProviderError> {
    match model_override.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) if accepts(model) => Ok(model.to_string()),
        Some(model) => Err(ProviderError::invalid_request(format!(
            "model '{}' is not served by the {} provider",
            model, provider
        ))),
        None => settings.configured_model().ok_or_else(|| {
            ProviderError::invalid_request(format!("no model configured for the {} provider", provider))
        }),
    }
}
