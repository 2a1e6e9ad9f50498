//! MCP protocol surface
//!
//! Per-request context, the dispatcher state machine, the error envelope,
//! the JSON-RPC binding and the HTTP server.

pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod jsonrpc;
pub mod server;

pub use context::{Context, RequestMetadata};
pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher, DispatcherConfig, InvocationRequest};
pub use errors::{ErrorBody, ErrorKind, McpError};
pub use jsonrpc::{JsonRpcRequest, JsonRpcResponse, RpcCalls, PROTOCOL_VERSION, SESSION_HEADER};
pub use server::{configure_routes, AppState, Envelope, McpServer, ServerInfo};
