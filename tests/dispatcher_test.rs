//! Dispatcher lifecycle: validation, lookup, cancellation, timeouts and panics

mod common;

use async_trait::async_trait;
use aytchmcp::capability::{
    Capability, CapabilityError, CapabilityKind, CapabilityMetadata, CapabilityRegistry, InvocationResult,
};
use aytchmcp::mcp::{Context, DispatchState, Dispatcher, DispatcherConfig, ErrorKind, InvocationRequest};
use aytchmcp::providers::{ProviderRegistry, ModelRequest};
use aytchmcp::tools::EchoTool;
use common::{single_provider, BlockingAdapter, ScriptedAdapter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts invocations so tests can prove a handler never ran
#[derive(Default)]
struct Counter {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Capability for Counter {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Tool,
            "count",
            "Counts calls",
            json!({
                "type": "object",
                "properties": {"amount": {"type": "integer", "minimum": 1}},
                "required": ["amount"]
            }),
        )
    }

    async fn invoke(&self, arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        let total = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"amount": arguments["amount"], "total": total}))
    }
}

/// Asks the active provider, so cancellation reaches the adapter
struct Asker;

#[async_trait]
impl Capability for Asker {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(CapabilityKind::Tool, "ask", "Asks the model", json!({"type": "object"}))
    }

    async fn invoke(&self, _arguments: Value, ctx: &Context) -> Result<Value, CapabilityError> {
        let response = ctx.complete(&ModelRequest::from_prompt("question")).await?;
        Ok(json!(response.content))
    }
}

struct Stubborn;

#[async_trait]
impl Capability for Stubborn {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(CapabilityKind::Tool, "stubborn", "Ignores cancellation", json!({"type": "object"}))
    }

    async fn invoke(&self, _arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!("done"))
    }
}

struct Panicky;

#[async_trait]
impl Capability for Panicky {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(CapabilityKind::Tool, "panic", "Always panics", json!({"type": "object"}))
    }

    async fn invoke(&self, _arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        panic!("handler exploded");
    }
}

fn dispatcher_with(
    capabilities: Vec<Arc<dyn Capability>>,
    providers: Arc<ProviderRegistry>,
    config: DispatcherConfig,
) -> Arc<Dispatcher> {
    let mut registry = CapabilityRegistry::new();
    for capability in capabilities {
        registry.register(capability).unwrap();
    }
    Arc::new(Dispatcher::new(Arc::new(registry), providers, config))
}

fn answering_providers() -> Arc<ProviderRegistry> {
    single_provider(Arc::new(ScriptedAdapter::answering(aytchmcp::providers::ProviderId::OpenAi)))
}

fn failure_kind(result: &InvocationResult) -> Option<ErrorKind> {
    match result {
        InvocationResult::Failure { kind, .. } => Some(*kind),
        _ => None,
    }
}

#[tokio::test]
async fn test_invalid_arguments_never_reach_the_handler() {
    let counter = Counter::default();
    let calls = counter.calls.clone();
    let dispatcher = dispatcher_with(vec![Arc::new(counter)], answering_providers(), DispatcherConfig::default());

    for arguments in [json!({}), json!({"amount": 0}), json!({"amount": "three"})] {
        let outcome = dispatcher
            .dispatch(InvocationRequest::new(CapabilityKind::Tool, "count", arguments))
            .await;
        assert_eq!(failure_kind(&outcome.result), Some(ErrorKind::InvalidArguments));
        assert_eq!(outcome.state(), DispatchState::Failed);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Tool, "count", json!({"amount": 2})))
        .await;
    assert_eq!(outcome.result, InvocationResult::Success(json!({"amount": 2, "total": 1})));
    assert_eq!(
        outcome.transitions,
        vec![
            DispatchState::Received,
            DispatchState::Resolved,
            DispatchState::Executing,
            DispatchState::Completed
        ]
    );
}

#[tokio::test]
async fn test_unknown_capability_is_not_found() {
    let dispatcher = dispatcher_with(vec![Arc::new(EchoTool)], answering_providers(), DispatcherConfig::default());

    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Tool, "nope", json!({})))
        .await;
    assert_eq!(failure_kind(&outcome.result), Some(ErrorKind::NotFound));

    // Same name under a different kind is a different capability
    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Prompt, "echo", json!({})))
        .await;
    assert_eq!(failure_kind(&outcome.result), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_malformed_body_fails_before_resolution() {
    let dispatcher = dispatcher_with(vec![Arc::new(EchoTool)], answering_providers(), DispatcherConfig::default());

    let outcome = dispatcher.dispatch_value(json!({"kind": "gadget", "name": "echo"})).await;
    assert_eq!(failure_kind(&outcome.result), Some(ErrorKind::MalformedRequest));
    assert_eq!(outcome.transitions, vec![DispatchState::Received, DispatchState::Failed]);

    let outcome = dispatcher
        .dispatch_value(json!({"kind": "tool", "name": "echo", "arguments": {"message": "hi"}, "request_id": "r-1"}))
        .await;
    assert_eq!(outcome.request_id, "r-1");
    assert_eq!(outcome.state(), DispatchState::Completed);
}

#[tokio::test]
async fn test_cancel_reaches_the_adapter() {
    let adapter = Arc::new(BlockingAdapter::default());
    let dispatcher = dispatcher_with(vec![Arc::new(Asker)], single_provider(adapter.clone()), DispatcherConfig::default());

    let running = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(InvocationRequest::new(CapabilityKind::Tool, "ask", json!({})).with_request_id("req-7"))
                .await
        })
    };

    while !adapter.started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(dispatcher.in_flight_count(), 1);
    assert!(dispatcher.cancel("req-7"));

    let outcome = running.await.unwrap();
    assert_eq!(outcome.result, InvocationResult::Cancelled);
    assert_eq!(outcome.state(), DispatchState::Cancelled);
    assert!(adapter.observed_cancel());
    assert_eq!(dispatcher.in_flight_count(), 0);
    assert!(!dispatcher.cancel("req-7"));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_produces_timeout_even_for_stubborn_handlers() {
    let config = DispatcherConfig {
        request_timeout: Duration::from_secs(60),
        cancel_grace: Duration::from_millis(50),
    };
    let dispatcher = dispatcher_with(vec![Arc::new(Stubborn)], answering_providers(), config);

    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Tool, "stubborn", json!({})).with_timeout_ms(500))
        .await;
    assert_eq!(failure_kind(&outcome.result), Some(ErrorKind::Timeout));
    assert_eq!(dispatcher.in_flight_count(), 0);
}

#[tokio::test]
async fn test_panicking_handler_becomes_execution_failure() {
    let dispatcher = dispatcher_with(
        vec![Arc::new(Panicky), Arc::new(EchoTool)],
        answering_providers(),
        DispatcherConfig::default(),
    );

    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Tool, "panic", json!({})))
        .await;
    match outcome.result {
        InvocationResult::Failure { kind, message } => {
            assert_eq!(kind, ErrorKind::ExecutionFailed);
            assert!(message.contains("handler exploded"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // The dispatcher keeps serving
    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Tool, "echo", json!({"message": "still here"})))
        .await;
    assert_eq!(outcome.state(), DispatchState::Completed);
}

#[tokio::test]
async fn test_provider_errors_keep_their_kind() {
    let adapter = Arc::new(ScriptedAdapter::new(
        aytchmcp::providers::ProviderId::OpenAi,
        vec![Err(aytchmcp::providers::ProviderError::auth("key revoked"))],
    ));
    let dispatcher = dispatcher_with(vec![Arc::new(Asker)], single_provider(adapter), DispatcherConfig::default());

    let outcome = dispatcher
        .dispatch(InvocationRequest::new(CapabilityKind::Tool, "ask", json!({})))
        .await;
    assert_eq!(failure_kind(&outcome.result), Some(ErrorKind::AuthError));
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let counter = Counter::default();
    let calls = counter.calls.clone();
    let dispatcher = dispatcher_with(
        vec![Arc::new(counter), Arc::new(Stubborn)],
        answering_providers(),
        DispatcherConfig::default(),
    );

    let stuck = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(InvocationRequest::new(CapabilityKind::Tool, "stubborn", json!({})).with_request_id("stuck"))
                .await
        })
    };

    let requests = (1..=8).map(|amount| {
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch(InvocationRequest::new(CapabilityKind::Tool, "count", json!({"amount": amount})))
                .await
        }
    });
    let outcomes = futures::future::join_all(requests).await;

    assert!(outcomes.iter().all(|o| o.state() == DispatchState::Completed));
    assert_eq!(calls.load(Ordering::SeqCst), 8);

    // The slow request keeps running and can be cancelled on its own
    while dispatcher.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(dispatcher.cancel("stuck"));
    assert_eq!(stuck.await.unwrap().result, InvocationResult::Cancelled);
}
