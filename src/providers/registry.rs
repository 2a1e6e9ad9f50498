//! Provider registry
//!
//! Adapters live in an immutable [`ProviderSnapshot`] held behind an
//! `ArcSwap`. Requests pin the snapshot that was current when they began,
//! so a reload never changes the provider under an in-flight request.

use super::adapter::{AdapterSettings, ProviderAdapter};
use super::anthropic::AnthropicAdapter;
use super::credentials::{Credential, CredentialSource, EnvCredentials};
use super::generic_chat::GenericChatAdapter;
use super::openai::OpenAiAdapter;
use super::openrouter::OpenRouterAdapter;
use super::retry::RetryPolicy;
use super::{ModelRequest, ModelResponse, ProviderError, ProviderId};
use crate::config::{LlmConfig, ProviderDescriptor};
use crate::error::{AytchError, Result};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Title reported to aggregators when no branding is configured
pub const DEFAULT_APP_TITLE: &str = "AytchMCP";

/// One provider's state inside a snapshot
#[derive(Clone)]
pub enum ProviderSlot {
    Ready {
        adapter: Arc<dyn ProviderAdapter>,
        policy: RetryPolicy,
        timeout: Duration,
    },
    Failed {
        reason: String,
    },
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready { adapter, policy, timeout } => f
                .debug_struct("Ready")
                .field("provider", &adapter.id())
                .field("policy", policy)
                .field("timeout", timeout)
                .finish(),
            Self::Failed { reason } => f.debug_struct("Failed").field("reason", reason).finish(),
        }
    }
}

/// Per-call options for [`ProviderSnapshot::invoke`]
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub model_override: Option<String>,
    /// Overall deadline; per-call timeouts are clamped to it
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl InvokeOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Readiness of one provider, safe to expose (no credential values)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderStatus {
    pub id: ProviderId,
    pub active: bool,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Immutable set of adapters plus the active provider id
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    active: ProviderId,
    slots: HashMap<ProviderId, ProviderSlot>,
}

/// Builder used by tests and embedders to assemble a snapshot by hand
#[derive(Debug)]
pub struct SnapshotBuilder {
    active: ProviderId,
    slots: HashMap<ProviderId, ProviderSlot>,
}

impl SnapshotBuilder {
    /// Add a ready adapter with the default call timeout
    pub fn adapter(self, adapter: Arc<dyn ProviderAdapter>, policy: RetryPolicy) -> Self {
        self.adapter_with_timeout(adapter, policy, Duration::from_secs(30))
    }

    pub fn adapter_with_timeout(
        mut self,
        adapter: Arc<dyn ProviderAdapter>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        self.slots.insert(
            adapter.id(),
            ProviderSlot::Ready {
                adapter,
                policy,
                timeout,
            },
        );
        self
    }

    /// Record a provider that failed to initialize
    pub fn failed<S: Into<String>>(mut self, id: ProviderId, reason: S) -> Self {
        self.slots.insert(id, ProviderSlot::Failed { reason: reason.into() });
        self
    }

    pub fn build(self) -> ProviderSnapshot {
        ProviderSnapshot {
            active: self.active,
            slots: self.slots,
        }
    }
}

impl ProviderSnapshot {
    pub fn builder(active: ProviderId) -> SnapshotBuilder {
        SnapshotBuilder {
            active,
            slots: HashMap::new(),
        }
    }

    /// Build every configured adapter over one shared HTTP client
    ///
    /// A provider whose credential is missing becomes a failed slot rather
    /// than an error; callers decide whether that is fatal.
    pub fn from_config(
        llm: &LlmConfig,
        credentials: Arc<dyn CredentialSource>,
        app_title: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("aytchmcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AytchError::startup(format!("Failed to build HTTP client: {}", e)))?;

        let mut slots = HashMap::new();
        for (id, descriptor) in &llm.providers {
            let slot = match build_adapter(*id, descriptor, credentials.clone(), client.clone(), app_title) {
                Ok(adapter) => {
                    debug!("Provider {} initialized", id);
                    ProviderSlot::Ready {
                        adapter,
                        policy: RetryPolicy::from_descriptor(descriptor),
                        timeout: Duration::from_secs(descriptor.timeout_secs),
                    }
                }
                Err(reason) => {
                    debug!("Provider {} unavailable: {}", id, reason);
                    ProviderSlot::Failed { reason }
                }
            };
            slots.insert(*id, slot);
        }

        Ok(Self {
            active: llm.active,
            slots,
        })
    }

    pub fn active_id(&self) -> ProviderId {
        self.active
    }

    /// Same adapters, different active provider
    pub fn with_active(&self, active: ProviderId) -> Self {
        Self {
            active,
            slots: self.slots.clone(),
        }
    }

    /// Number of providers that initialized successfully
    pub fn ready_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, ProviderSlot::Ready { .. }))
            .count()
    }

    /// The active adapter, or `Configuration` when it is unusable
    pub fn resolve_active(&self) -> std::result::Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.active_slot().map(|(adapter, _, _)| adapter)
    }

    fn active_slot(&self) -> std::result::Result<(Arc<dyn ProviderAdapter>, RetryPolicy, Duration), ProviderError> {
        match self.slots.get(&self.active) {
            Some(ProviderSlot::Ready {
                adapter,
                policy,
                timeout,
            }) => Ok((adapter.clone(), policy.clone(), *timeout)),
            Some(ProviderSlot::Failed { reason }) => Err(ProviderError::configuration(format!(
                "active provider '{}' is unavailable: {}",
                self.active, reason
            ))),
            None => Err(ProviderError::configuration(format!(
                "active provider '{}' is not configured",
                self.active
            ))),
        }
    }

    /// Readiness of every configured provider, sorted by id
    pub fn status(&self) -> Vec<ProviderStatus> {
        let mut statuses: Vec<ProviderStatus> = self
            .slots
            .iter()
            .map(|(id, slot)| match slot {
                ProviderSlot::Ready { adapter, .. } => ProviderStatus {
                    id: *id,
                    active: *id == self.active,
                    ready: true,
                    model: adapter.configured_model(),
                    reason: None,
                },
                ProviderSlot::Failed { reason } => ProviderStatus {
                    id: *id,
                    active: *id == self.active,
                    ready: false,
                    model: None,
                    reason: Some(reason.clone()),
                },
            })
            .collect();
        statuses.sort_by_key(|s| s.id.as_str());
        statuses
    }

    /// Invoke the active provider, retrying transient failures
    pub async fn invoke(
        &self,
        request: &ModelRequest,
        options: &InvokeOptions,
    ) -> std::result::Result<ModelResponse, ProviderError> {
        let (adapter, policy, call_timeout) = self.active_slot()?;
        let provider = adapter.id();
        let mut attempt: u32 = 0;

        loop {
            if options.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let timeout = match options.deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ProviderError::timeout("request deadline exceeded"));
                    }
                    call_timeout.min(remaining)
                }
                None => call_timeout,
            };

            let outcome = adapter
                .invoke(request, options.model_override.as_deref(), timeout, &options.cancel)
                .await;

            let error = match outcome {
                Ok(response) => {
                    if attempt > 0 {
                        info!("Provider {} succeeded after {} retries", provider, attempt);
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            attempt += 1;
            let Some(delay) = policy.backoff_for(attempt, &error) else {
                return Err(error);
            };

            if let Some(deadline) = options.deadline {
                if Instant::now() + delay >= deadline {
                    debug!(
                        "Not retrying {} after {:?}: deadline leaves no room for backoff",
                        provider, error
                    );
                    return Err(error);
                }
            }

            warn!(
                "Provider {} failed ({}), retry {}/{} in {:?}",
                provider, error, attempt, policy.max_retries, delay
            );

            tokio::select! {
                biased;
                _ = options.cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Build the adapter for one configured provider
///
/// Fails with a reason when the credential reference does not resolve.
pub fn build_adapter(
    id: ProviderId,
    descriptor: &ProviderDescriptor,
    credentials: Arc<dyn CredentialSource>,
    client: reqwest::Client,
    app_title: &str,
) -> std::result::Result<Arc<dyn ProviderAdapter>, String> {
    let credential = Credential::new(descriptor.api_key_env.clone(), credentials);
    if !credential.is_resolvable() {
        return Err(format!("credential variable {} is not set", descriptor.api_key_env));
    }

    let settings = AdapterSettings::new(descriptor.clone(), credential, client);
    let adapter: Arc<dyn ProviderAdapter> = match id {
        ProviderId::OpenAi => Arc::new(OpenAiAdapter::new(settings)),
        ProviderId::Anthropic => Arc::new(AnthropicAdapter::new(settings)),
        ProviderId::OpenRouter => Arc::new(OpenRouterAdapter::new(settings, app_title)),
        ProviderId::GenericChat => Arc::new(GenericChatAdapter::new(settings)),
    };
    Ok(adapter)
}

/// Hot-swappable provider registry
pub struct ProviderRegistry {
    current: ArcSwap<ProviderSnapshot>,
    credentials: Arc<dyn CredentialSource>,
    app_title: String,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("current", &*self.current.load_full())
            .field("app_title", &self.app_title)
            .finish()
    }
}

impl ProviderRegistry {
    /// Registry over environment credentials
    pub fn new(llm: &LlmConfig) -> Result<Self> {
        Self::with_credentials(llm, Arc::new(EnvCredentials), DEFAULT_APP_TITLE)
    }

    pub fn with_credentials(
        llm: &LlmConfig,
        credentials: Arc<dyn CredentialSource>,
        app_title: &str,
    ) -> Result<Self> {
        let snapshot = ProviderSnapshot::from_config(llm, credentials.clone(), app_title)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            credentials,
            app_title: app_title.to_string(),
        })
    }

    /// Registry over a hand-built snapshot
    pub fn from_snapshot(snapshot: ProviderSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            credentials: Arc::new(EnvCredentials),
            app_title: DEFAULT_APP_TITLE.to_string(),
        }
    }

    /// Pin the current snapshot
    pub fn snapshot(&self) -> Arc<ProviderSnapshot> {
        self.current.load_full()
    }

    pub fn active_id(&self) -> ProviderId {
        self.current.load().active_id()
    }

    pub fn resolve_active(&self) -> std::result::Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.current.load().resolve_active()
    }

    /// Invoke the active provider with an overall time budget
    pub async fn invoke(
        &self,
        request: &ModelRequest,
        timeout: Duration,
    ) -> std::result::Result<ModelResponse, ProviderError> {
        let options = InvokeOptions::default().with_deadline(Instant::now() + timeout);
        self.invoke_with(request, &options).await
    }

    pub async fn invoke_with(
        &self,
        request: &ModelRequest,
        options: &InvokeOptions,
    ) -> std::result::Result<ModelResponse, ProviderError> {
        let snapshot = self.snapshot();
        snapshot.invoke(request, options).await
    }

    /// Rebuild from configuration and install the result
    ///
    /// A configuration in which no provider initializes is rejected and the
    /// previous snapshot stays active.
    pub fn reload(&self, llm: &LlmConfig) -> Result<()> {
        let snapshot = ProviderSnapshot::from_config(llm, self.credentials.clone(), &self.app_title)?;
        if snapshot.ready_count() == 0 {
            return Err(AytchError::registry(
                "reload rejected: no provider could be initialized",
            ));
        }
        if let Err(e) = snapshot.resolve_active() {
            warn!("Reloaded configuration has an unusable active provider: {}", e);
        }
        self.install(snapshot);
        Ok(())
    }

    /// Atomically replace the current snapshot
    pub fn install(&self, snapshot: ProviderSnapshot) {
        info!(
            "Installing provider snapshot (active: {}, ready: {})",
            snapshot.active_id(),
            snapshot.ready_count()
        );
        self.current.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StaticCredentials;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        error: ProviderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProviderAdapter for Flaky {
        fn id(&self) -> ProviderId {
            ProviderId::OpenAi
        }

        fn configured_model(&self) -> Option<String> {
            Some("gpt-4o".to_string())
        }

        async fn invoke(
            &self,
            _request: &ModelRequest,
            _model_override: Option<&str>,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> std::result::Result<ModelResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(ModelResponse {
                content: "ok".to_string(),
                model: "gpt-4o".to_string(),
                provider: ProviderId::OpenAi,
                usage: None,
                stop_reason: None,
            })
        }
    }

    fn flaky(failures: u32, error: ProviderError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_with_backoff() {
        let adapter = flaky(2, ProviderError::timeout("slow"));
        let snapshot = ProviderSnapshot::builder(ProviderId::OpenAi)
            .adapter(adapter.clone(), RetryPolicy::default())
            .build();

        let start = Instant::now();
        let response = snapshot
            .invoke(&ModelRequest::from_prompt("hi"), &InvokeOptions::default())
            .await
            .unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
        // 500ms + 1s of backoff
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries_early() {
        let adapter = flaky(5, ProviderError::rate_limited(Some(Duration::from_secs(10)), "later"));
        let snapshot = ProviderSnapshot::builder(ProviderId::OpenAi)
            .adapter(adapter.clone(), RetryPolicy::default())
            .build();

        let options = InvokeOptions::default().with_deadline(Instant::now() + Duration::from_secs(5));
        let err = snapshot
            .invoke(&ModelRequest::from_prompt("hi"), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_active_provider_is_configuration_error() {
        let snapshot = ProviderSnapshot::builder(ProviderId::Anthropic)
            .adapter(flaky(0, ProviderError::timeout("x")), RetryPolicy::default())
            .failed(ProviderId::Anthropic, "credential variable ANTHROPIC_API_KEY is not set")
            .build();

        let err = snapshot.resolve_active().err().unwrap();
        assert!(matches!(err, ProviderError::Configuration { .. }));
        assert_eq!(snapshot.ready_count(), 1);
    }

    #[test]
    fn test_missing_credentials_become_failed_slots() {
        let llm = LlmConfig::default();
        let credentials = Arc::new(StaticCredentials::new().with("OPENAI_API_KEY", "sk-test"));
        let snapshot = ProviderSnapshot::from_config(&llm, credentials, "Test").unwrap();

        let status = snapshot.status();
        let openai = status.iter().find(|s| s.id == ProviderId::OpenAi).unwrap();
        assert!(openai.ready);
        let anthropic = status.iter().find(|s| s.id == ProviderId::Anthropic).unwrap();
        assert!(!anthropic.ready);
        assert!(anthropic.reason.as_deref().unwrap().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_reload_without_ready_providers_keeps_snapshot() {
        let credentials = Arc::new(StaticCredentials::new().with("OPENAI_API_KEY", "sk-test"));
        let registry = ProviderRegistry::with_credentials(&LlmConfig::default(), credentials, "Test").unwrap();

        let mut broken = LlmConfig::default();
        for descriptor in broken.providers.values_mut() {
            descriptor.api_key_env = "AYTCHMCP_TEST_UNSET_KEY".to_string();
        }

        assert!(registry.reload(&broken).is_err());
        assert!(registry.resolve_active().is_ok());
    }
}
