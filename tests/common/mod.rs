//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use aytchmcp::providers::{
    ModelRequest, ModelResponse, ProviderAdapter, ProviderError, ProviderId, ProviderRegistry, ProviderSnapshot,
    RetryPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn response(provider: ProviderId, content: &str) -> ModelResponse {
    ModelResponse {
        content: content.to_string(),
        model: "test-model".to_string(),
        provider,
        usage: None,
        stop_reason: None,
    }
}

/// Replays a fixed sequence of outcomes, then keeps succeeding
#[derive(Debug)]
pub struct ScriptedAdapter {
    id: ProviderId,
    script: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    delay: Duration,
    pub calls: AtomicU32,
}

impl ScriptedAdapter {
    pub fn new(id: ProviderId, script: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            id,
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn answering(id: ProviderId) -> Self {
        Self::new(id, Vec::new())
    }

    /// Each call sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn configured_model(&self) -> Option<String> {
        Some("test-model".to_string())
    }

    async fn invoke(
        &self,
        _request: &ModelRequest,
        model_override: Option<&str>,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<ModelResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => {
                let mut answer = response(self.id, self.id.as_str());
                if let Some(model) = model_override {
                    answer.model = model.to_string();
                }
                Ok(answer)
            }
        }
    }
}

/// Blocks until cancelled, recording that it saw the cancellation
#[derive(Debug, Default)]
pub struct BlockingAdapter {
    pub started: AtomicBool,
    pub observed_cancel: AtomicBool,
}

impl BlockingAdapter {
    pub fn observed_cancel(&self) -> bool {
        self.observed_cancel.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for BlockingAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn configured_model(&self) -> Option<String> {
        Some("test-model".to_string())
    }

    async fn invoke(
        &self,
        _request: &ModelRequest,
        _model_override: Option<&str>,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ProviderError> {
        self.started.store(true, Ordering::SeqCst);
        cancel.cancelled().await;
        self.observed_cancel.store(true, Ordering::SeqCst);
        Err(ProviderError::Cancelled)
    }
}

/// Registry whose only provider is `adapter`
pub fn single_provider(adapter: Arc<dyn ProviderAdapter>) -> Arc<ProviderRegistry> {
    let snapshot = ProviderSnapshot::builder(adapter.id())
        .adapter(adapter, RetryPolicy::default())
        .build();
    Arc::new(ProviderRegistry::from_snapshot(snapshot))
}
