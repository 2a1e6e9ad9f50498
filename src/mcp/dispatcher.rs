//! Request dispatcher
//!
//! Drives one request through `Received → Resolved → Executing` and into
//! exactly one terminal state. Every handler exit path, panics included,
//! is normalized into an [`InvocationResult`] here.

use super::context::{Context, RequestMetadata};
use super::errors::ErrorKind;
use crate::capability::{CapabilityError, CapabilityKind, CapabilityRegistry, InvocationResult, RegisteredCapability};
use crate::providers::ProviderRegistry;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle states of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchState {
    Received,
    Resolved,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Decoded invocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub kind: CapabilityKind,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Client deadline, capped by the server's request timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl InvocationRequest {
    pub fn new<S: Into<String>>(kind: CapabilityKind, name: S, arguments: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            arguments,
            request_id: None,
            timeout_ms: None,
            metadata: RequestMetadata::default(),
        }
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Result of dispatching one request
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub request_id: String,
    pub result: InvocationResult,
    /// States visited, in order
    pub transitions: Vec<DispatchState>,
}

impl DispatchOutcome {
    pub fn state(&self) -> DispatchState {
        self.transitions.last().copied().unwrap_or(DispatchState::Received)
    }
}

/// Dispatcher tunables
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound for any request deadline
    pub request_timeout: Duration,
    /// Time a cancelled handler gets before it is dropped
    pub cancel_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_millis(250),
        }
    }
}

impl DispatcherConfig {
    pub fn from_server(server: &crate::config::ServerConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(server.request_timeout_secs),
            cancel_grace: Duration::from_millis(server.cancel_grace_ms),
        }
    }
}

/// Routes requests to capabilities and tracks in-flight cancellation
pub struct Dispatcher {
    capabilities: Arc<CapabilityRegistry>,
    providers: Arc<ProviderRegistry>,
    in_flight: Arc<DashMap<String, CancellationToken>>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capabilities", &self.capabilities.len())
            .field("in_flight", &self.in_flight.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Removes the in-flight entry and fires the token when the request ends,
/// including when the request future is dropped mid-flight
struct InFlightGuard {
    request_id: String,
    token: CancellationToken,
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.in_flight.remove(&self.request_id);
    }
}

/// Progress record for one request
struct Transitions {
    request_id: String,
    states: Vec<DispatchState>,
}

impl Transitions {
    fn new(request_id: &str) -> Self {
        debug!("[{}] Received", request_id);
        Self {
            request_id: request_id.to_string(),
            states: vec![DispatchState::Received],
        }
    }

    fn advance(&mut self, state: DispatchState) {
        debug!("[{}] -> {:?}", self.request_id, state);
        self.states.push(state);
    }

    fn finish(mut self, result: InvocationResult) -> DispatchOutcome {
        let terminal = match &result {
            InvocationResult::Success(_) => DispatchState::Completed,
            InvocationResult::Failure { .. } => DispatchState::Failed,
            InvocationResult::Cancelled => DispatchState::Cancelled,
        };
        self.advance(terminal);
        DispatchOutcome {
            request_id: self.request_id,
            result,
            transitions: self.states,
        }
    }
}

impl Dispatcher {
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        providers: Arc<ProviderRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            capabilities,
            providers,
            in_flight: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Decode a raw request body
    pub fn decode(body: Value) -> Result<InvocationRequest, CapabilityError> {
        serde_json::from_value(body)
            .map_err(|e| CapabilityError::new(ErrorKind::MalformedRequest, format!("Malformed request: {}", e)))
    }

    /// Decode and dispatch a raw request body
    pub async fn dispatch_value(&self, body: Value) -> DispatchOutcome {
        let fallback_id = body
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match Self::decode(body) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                let transitions = Transitions::new(&fallback_id);
                transitions.finish(InvocationResult::Failure {
                    kind: e.kind,
                    message: e.message,
                })
            }
        }
    }

    /// Run one request to a terminal state
    pub async fn dispatch(&self, request: InvocationRequest) -> DispatchOutcome {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut transitions = Transitions::new(&request_id);

        // The snapshot current at arrival serves the whole request
        let snapshot = self.providers.snapshot();
        transitions.advance(DispatchState::Resolved);

        let entry = match self.resolve(&request) {
            Ok(entry) => entry,
            Err(e) => return transitions.finish(failure(e)),
        };

        let arguments = match request.arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        if let Err(e) = entry.validate(&arguments) {
            return transitions.finish(failure(e));
        }

        let token = CancellationToken::new();
        let _guard = match self.track(&request_id, &token) {
            Some(guard) => guard,
            None => {
                return transitions.finish(InvocationResult::Failure {
                    kind: ErrorKind::MalformedRequest,
                    message: format!("request id '{}' is already in flight", request_id),
                })
            }
        };

        let timeout = request
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .map_or(self.config.request_timeout, |t| t.min(self.config.request_timeout));
        let deadline = Instant::now() + timeout;
        let ctx = Context::new(request_id.clone(), deadline, token.clone(), snapshot).with_metadata(request.metadata);

        transitions.advance(DispatchState::Executing);
        let result = self.execute(&entry, arguments, &ctx, &token).await;

        match &result {
            InvocationResult::Failure { kind, message } => {
                warn!("[{}] {} '{}' failed ({}): {}", request_id, request.kind, request.name, kind, message)
            }
            InvocationResult::Cancelled => info!("[{}] {} '{}' cancelled", request_id, request.kind, request.name),
            InvocationResult::Success(_) => {}
        }
        transitions.finish(result)
    }

    /// Fire the token of an in-flight request
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.in_flight.get(request_id) {
            Some(token) => {
                info!("Cancelling request {}", request_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn resolve(&self, request: &InvocationRequest) -> Result<RegisteredCapability, CapabilityError> {
        match self.capabilities.entry(request.kind, &request.name) {
            Ok(entry) => Ok(entry.clone()),
            Err(e) if request.kind == CapabilityKind::Resource => self
                .capabilities
                .lookup_resource_by_uri(&request.name)
                .map(Clone::clone)
                .map_err(|_| e),
            Err(e) => Err(e),
        }
    }

    fn track(&self, request_id: &str, token: &CancellationToken) -> Option<InFlightGuard> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(request_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Some(InFlightGuard {
                    request_id: request_id.to_string(),
                    token: token.clone(),
                    in_flight: self.in_flight.clone(),
                })
            }
        }
    }

    async fn execute(
        &self,
        entry: &RegisteredCapability,
        arguments: Value,
        ctx: &Context,
        token: &CancellationToken,
    ) -> InvocationResult {
        let capability = entry.capability();
        let handler = AssertUnwindSafe(capability.invoke(arguments, ctx)).catch_unwind();
        tokio::pin!(handler);

        let interrupted = tokio::select! {
            biased;
            finished = &mut handler => return settle(finished),
            _ = token.cancelled() => InvocationResult::Cancelled,
            _ = tokio::time::sleep_until(ctx.deadline()) => InvocationResult::Failure {
                kind: ErrorKind::Timeout,
                message: "request exceeded its deadline".to_string(),
            },
        };

        // Let the handler observe the token (adapters abort their call), then drop it
        token.cancel();
        if tokio::time::timeout(self.config.cancel_grace, &mut handler).await.is_err() {
            debug!("[{}] Handler did not stop within the grace window", ctx.request_id());
        }
        interrupted
    }
}

fn failure(e: CapabilityError) -> InvocationResult {
    InvocationResult::Failure {
        kind: e.kind,
        message: e.message,
    }
}

fn settle(finished: Result<Result<Value, CapabilityError>, Box<dyn Any + Send>>) -> InvocationResult {
    match finished {
        Ok(result) => InvocationResult::from(result),
        Err(panic) => InvocationResult::Failure {
            kind: ErrorKind::ExecutionFailed,
            message: format!("handler panicked: {}", panic_message(panic.as_ref())),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
