//! Per-request handler context
//!
//! A [`Context`] is built by the dispatcher for one invocation and dropped
//! when the handler returns. It pins the provider snapshot that was current
//! when the request arrived, so a concurrent reload never switches the
//! provider under a running handler.

use crate::providers::{
    InvokeOptions, ModelRequest, ModelResponse, ProviderError, ProviderId, ProviderSnapshot, ProviderStatus,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Client-supplied request metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Conversation the request belongs to, if the client tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Free-form client identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

/// Handler-facing view of one request
#[derive(Debug)]
pub struct Context {
    request_id: String,
    deadline: Instant,
    cancel: CancellationToken,
    providers: Arc<ProviderSnapshot>,
    metadata: RequestMetadata,
    cache: DashMap<String, Value>,
}

impl Context {
    pub fn new<S: Into<String>>(
        request_id: S,
        deadline: Instant,
        cancel: CancellationToken,
        providers: Arc<ProviderSnapshot>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            deadline,
            cancel,
            providers,
            metadata: RequestMetadata::default(),
            cache: DashMap::new(),
        }
    }

    /// Context with a fresh token and a deadline `timeout` from now
    pub fn with_timeout<S: Into<String>>(request_id: S, timeout: Duration, providers: Arc<ProviderSnapshot>) -> Self {
        Self::new(request_id, Instant::now() + timeout, CancellationToken::new(), providers)
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Provider that serves this request
    pub fn active_provider(&self) -> ProviderId {
        self.providers.active_id()
    }

    /// Readiness of the pinned providers
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.providers.status()
    }

    /// Send a model request through the pinned provider snapshot
    pub async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.providers.invoke(request, &self.invoke_options(None)).await
    }

    /// As [`Context::complete`], with a model override for the adapter
    pub async fn complete_with_model(
        &self,
        request: &ModelRequest,
        model: Option<&str>,
    ) -> Result<ModelResponse, ProviderError> {
        self.providers.invoke(request, &self.invoke_options(model)).await
    }

    /// Single-turn prompt, returning the response text
    pub async fn prompt<S: Into<String>>(&self, text: S) -> Result<String, ProviderError> {
        let response = self.complete(&ModelRequest::from_prompt(text)).await?;
        Ok(response.content)
    }

    fn invoke_options(&self, model: Option<&str>) -> InvokeOptions {
        InvokeOptions {
            model_override: model.map(str::to_string),
            deadline: Some(self.deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Per-request scratch storage
    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).map(|entry| entry.value().clone())
    }

    pub fn cache_set<S: Into<String>>(&self, key: S, value: Value) {
        self.cache.insert(key.into(), value);
    }

    pub fn cache_delete(&self, key: &str) -> Option<Value> {
        self.cache.remove(key).map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_snapshot() -> Arc<ProviderSnapshot> {
        Arc::new(ProviderSnapshot::builder(ProviderId::OpenAi).build())
    }

    #[tokio::test]
    async fn test_cache_is_per_context() {
        let ctx = Context::with_timeout("req-1", Duration::from_secs(5), empty_snapshot());
        ctx.cache_set("k", json!(1));
        assert_eq!(ctx.cache_get("k"), Some(json!(1)));
        assert_eq!(ctx.cache_delete("k"), Some(json!(1)));
        assert_eq!(ctx.cache_get("k"), None);

        let other = Context::with_timeout("req-2", Duration::from_secs(5), empty_snapshot());
        assert_eq!(other.cache_get("k"), None);
    }

    #[tokio::test]
    async fn test_unresolvable_provider_is_configuration_error() {
        let ctx = Context::with_timeout("req-1", Duration::from_secs(5), empty_snapshot());
        let err = ctx.prompt("hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_budget_shrinks() {
        let ctx = Context::with_timeout("req-1", Duration::from_secs(10), empty_snapshot());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(ctx.remaining(), Duration::from_secs(6));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_cancelled_future_completes_after_cancel() {
        let token = CancellationToken::new();
        let ctx = Context::new("req-1", Instant::now() + Duration::from_secs(5), token.clone(), empty_snapshot());
        assert!(!ctx.is_cancelled());
        token.cancel();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
