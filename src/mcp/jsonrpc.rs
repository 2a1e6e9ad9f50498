//! JSON-RPC 2.0 binding
//!
//! Maps MCP methods onto the dispatcher. JSON-RPC ids are scoped to the
//! client session (`Mcp-Session-Id`), so every call runs under a fresh
//! dispatcher request id and [`RpcCalls`] maps `(session, id)` back to it for
//! `notifications/cancelled`.

use super::dispatcher::{Dispatcher, InvocationRequest};
use super::errors::McpError;
use super::server::ServerInfo;
use crate::capability::{CapabilityKind, CapabilityMetadata, InvocationResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Header identifying the client session on the JSON-RPC binding
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// A JSON-RPC id as seen by one client session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    session: Option<String>,
    rpc_id: String,
}

/// In-flight JSON-RPC calls, keyed by session and JSON-RPC id
///
/// Calls without a session share one anonymous scope.
#[derive(Debug, Default)]
pub struct RpcCalls {
    calls: DashMap<CallKey, Vec<String>>,
}

impl RpcCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked in-flight calls
    pub fn len(&self) -> usize {
        self.calls.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn track(&self, key: CallKey, request_id: &str) -> TrackedCall<'_> {
        self.calls.entry(key.clone()).or_default().push(request_id.to_string());
        TrackedCall {
            calls: self,
            key,
            request_id: request_id.to_string(),
        }
    }

    fn untrack(&self, key: &CallKey, request_id: &str) {
        if let Entry::Occupied(mut entry) = self.calls.entry(key.clone()) {
            entry.get_mut().retain(|id| id != request_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    fn request_ids(&self, key: &CallKey) -> Vec<String> {
        self.calls.get(key).map(|ids| ids.clone()).unwrap_or_default()
    }
}

/// Drops the mapping when the call ends or its future is dropped
struct TrackedCall<'a> {
    calls: &'a RpcCalls,
    key: CallKey,
    request_id: String,
}

impl Drop for TrackedCall<'_> {
    fn drop(&mut self) {
        self.calls.untrack(&self.key, &self.request_id);
    }
}

/// Incoming JSON-RPC message
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC response
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    /// Session to report in the [`SESSION_HEADER`] response header
    #[serde(skip)]
    pub session: Option<String>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
            session: None,
        }
    }

    pub fn failure(id: Value, error: McpError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
            session: None,
        }
    }

    pub fn with_session<S: Into<String>>(mut self, session: S) -> Self {
        self.session = Some(session.into());
        self
    }
}

/// Handle one raw JSON-RPC body; `None` means nothing is sent back
pub async fn handle(
    dispatcher: &Dispatcher,
    calls: &RpcCalls,
    info: &ServerInfo,
    session: Option<&str>,
    body: &[u8],
) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return Some(JsonRpcResponse::failure(
                Value::Null,
                McpError::parse_error(format!("Parse error: {}", e)),
            ))
        }
    };

    let id_hint = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Some(JsonRpcResponse::failure(
                id_hint,
                McpError::invalid_request(format!("Invalid request: {}", e)),
            ))
        }
    };

    if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
        return Some(JsonRpcResponse::failure(
            request.id.unwrap_or(Value::Null),
            McpError::invalid_request("jsonrpc must be \"2.0\"".to_string()),
        ));
    }

    debug!("JSON-RPC {} (id: {:?})", request.method, request.id);
    let Some(id) = request.id.clone() else {
        handle_notification(dispatcher, calls, session, &request);
        return None;
    };

    // A session starts at `initialize`; the client echoes it on later requests
    if request.method == "initialize" {
        let session = session.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        return Some(JsonRpcResponse::success(id, initialize(info)).with_session(session));
    }

    let params = request.params.unwrap_or(Value::Null);
    let scope = Scope { dispatcher, calls, session };
    let outcome = match request.method.as_str() {
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": dispatcher.capabilities().list(CapabilityKind::Tool).iter().map(tool_entry).collect::<Vec<_>>() })),
        "resources/list" => Ok(json!({ "resources": dispatcher.capabilities().list(CapabilityKind::Resource).iter().map(resource_entry).collect::<Vec<_>>() })),
        "prompts/list" => Ok(json!({ "prompts": dispatcher.capabilities().list(CapabilityKind::Prompt).iter().map(prompt_entry).collect::<Vec<_>>() })),
        "tools/call" => call(&scope, CapabilityKind::Tool, "name", &id, params).await,
        "resources/read" => call(&scope, CapabilityKind::Resource, "uri", &id, params).await,
        "prompts/get" => call(&scope, CapabilityKind::Prompt, "name", &id, params).await,
        other => Err(Some(McpError::method_not_found(other))),
    };

    match outcome {
        Ok(result) => Some(JsonRpcResponse::success(id, result)),
        Err(Some(error)) => Some(JsonRpcResponse::failure(id, error)),
        // Cancelled requests get no response
        Err(None) => None,
    }
}

fn handle_notification(dispatcher: &Dispatcher, calls: &RpcCalls, session: Option<&str>, request: &JsonRpcRequest) {
    match request.method.as_str() {
        "notifications/cancelled" => {
            let target = request
                .params
                .as_ref()
                .and_then(|p| p.get("requestId"))
                .and_then(request_id_string);
            let Some(rpc_id) = target else {
                debug!("notifications/cancelled without requestId");
                return;
            };
            let key = CallKey {
                session: session.map(str::to_string),
                rpc_id,
            };
            let request_ids = calls.request_ids(&key);
            if request_ids.is_empty() {
                debug!("Cancellation for unknown request {}", key.rpc_id);
            }
            for request_id in request_ids {
                dispatcher.cancel(&request_id);
            }
        }
        other => debug!("Ignoring notification {}", other),
    }
}

fn initialize(info: &ServerInfo) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {
            "name": info.name,
            "version": info.version,
        },
        "instructions": info.description,
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {},
        },
    })
}

/// What a call needs from the enclosing request
struct Scope<'a> {
    dispatcher: &'a Dispatcher,
    calls: &'a RpcCalls,
    session: Option<&'a str>,
}

/// Dispatch a call-style method; `Err(None)` when the request was cancelled
async fn call(
    scope: &Scope<'_>,
    kind: CapabilityKind,
    target_field: &str,
    id: &Value,
    params: Value,
) -> Result<Value, Option<McpError>> {
    let target = params
        .get(target_field)
        .and_then(Value::as_str)
        .ok_or_else(|| Some(McpError::invalid_params(format!("params.{} is required", target_field))))?
        .to_string();
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let request_id = Uuid::new_v4().to_string();
    let _tracked = request_id_string(id).map(|rpc_id| {
        let key = CallKey {
            session: scope.session.map(str::to_string),
            rpc_id,
        };
        scope.calls.track(key, &request_id)
    });

    let mut request = InvocationRequest::new(kind, target.clone(), arguments).with_request_id(request_id);
    request.timeout_ms = params.pointer("/_meta/timeoutMs").and_then(Value::as_u64);
    request.metadata.conversation_id = params
        .pointer("/_meta/conversationId")
        .and_then(Value::as_str)
        .map(str::to_string);

    match scope.dispatcher.dispatch(request).await.result {
        InvocationResult::Success(payload) => Ok(wrap_result(kind, &target, payload)),
        InvocationResult::Failure { kind, message } => Err(Some(McpError::from_kind(kind, message))),
        InvocationResult::Cancelled => Err(None),
    }
}

/// Shape a payload the way each MCP method reports results
fn wrap_result(kind: CapabilityKind, target: &str, payload: Value) -> Value {
    match kind {
        CapabilityKind::Tool => json!({
            "content": [{ "type": "text", "text": payload_text(&payload) }],
            "structuredContent": payload,
            "isError": false,
        }),
        CapabilityKind::Resource => json!({
            "contents": [{
                "uri": target,
                "mimeType": "application/json",
                "text": payload_text(&payload),
            }],
        }),
        CapabilityKind::Prompt => payload,
    }
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn request_id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn tool_entry(metadata: &CapabilityMetadata) -> Value {
    json!({
        "name": metadata.name,
        "description": metadata.description,
        "inputSchema": metadata.input_schema,
    })
}

fn resource_entry(metadata: &CapabilityMetadata) -> Value {
    json!({
        "uri": metadata.uri.clone().unwrap_or_else(|| metadata.name.clone()),
        "name": metadata.name,
        "description": metadata.description,
        "mimeType": "application/json",
    })
}

/// Prompt arguments derived from the schema's properties
fn prompt_entry(metadata: &CapabilityMetadata) -> Value {
    let required: Vec<&str> = metadata
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let arguments: Vec<Value> = metadata
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| {
                    json!({
                        "name": name,
                        "description": schema.get("description").cloned().unwrap_or(Value::Null),
                        "required": required.contains(&name.as_str()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "name": metadata.name,
        "description": metadata.description,
        "arguments": arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_are_scoped_by_session() {
        let calls = RpcCalls::new();
        let key = |session: Option<&str>| CallKey {
            session: session.map(str::to_string),
            rpc_id: "1".to_string(),
        };

        let a = calls.track(key(Some("a")), "req-a");
        let b = calls.track(key(Some("b")), "req-b");
        let anonymous = calls.track(key(None), "req-anon");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls.request_ids(&key(Some("a"))), vec!["req-a".to_string()]);
        assert_eq!(calls.request_ids(&key(None)), vec!["req-anon".to_string()]);

        drop(a);
        assert!(calls.request_ids(&key(Some("a"))).is_empty());
        drop(b);
        drop(anonymous);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_request_ids_accept_numbers_and_strings() {
        assert_eq!(request_id_string(&json!(7)), Some("7".to_string()));
        assert_eq!(request_id_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(request_id_string(&Value::Null), None);
    }

    #[test]
    fn test_prompt_arguments_from_schema() {
        let metadata = CapabilityMetadata::new(
            CapabilityKind::Prompt,
            "summarize",
            "Summarize text",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}, "style": {"type": "string"}},
                "required": ["text"]
            }),
        );
        let entry = prompt_entry(&metadata);
        let args = entry["arguments"].as_array().unwrap();
        assert_eq!(args.len(), 2);
        let text = args.iter().find(|a| a["name"] == "text").unwrap();
        assert_eq!(text["required"], true);
    }
}
