//! Protocol error taxonomy
//!
//! [`ErrorKind`] is the single classification every failure ends up in.
//! The HTTP envelope reports the kind name; the JSON-RPC binding maps it to
//! a numeric code and keeps the name in `data.kind`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Classification of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedRequest,
    NotFound,
    InvalidArguments,
    ConfigurationError,
    AuthError,
    RateLimited,
    InvalidRequest,
    UpstreamUnavailable,
    Timeout,
    UnknownUpstreamError,
    ExecutionFailed,
    Cancelled,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::MalformedRequest,
        ErrorKind::NotFound,
        ErrorKind::InvalidArguments,
        ErrorKind::ConfigurationError,
        ErrorKind::AuthError,
        ErrorKind::RateLimited,
        ErrorKind::InvalidRequest,
        ErrorKind::UpstreamUnavailable,
        ErrorKind::Timeout,
        ErrorKind::UnknownUpstreamError,
        ErrorKind::ExecutionFailed,
        ErrorKind::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedRequest => "MalformedRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::AuthError => "AuthError",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::UnknownUpstreamError => "UnknownUpstreamError",
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// JSON-RPC error code
    ///
    /// Standard codes where JSON-RPC defines one, otherwise the server range.
    /// An unknown capability is not an unknown method, so it never uses -32601.
    pub fn rpc_code(&self) -> i32 {
        match self {
            ErrorKind::MalformedRequest => -32600,
            ErrorKind::NotFound => -32002,
            ErrorKind::InvalidArguments => -32602,
            ErrorKind::ConfigurationError => -31992,
            ErrorKind::AuthError => -31994,
            ErrorKind::RateLimited => -31990,
            ErrorKind::InvalidRequest => -31991,
            ErrorKind::UpstreamUnavailable => -31989,
            ErrorKind::Timeout => -31988,
            ErrorKind::UnknownUpstreamError => -31987,
            ErrorKind::ExecutionFailed => -31999,
            ErrorKind::Cancelled => -32800,
        }
    }

    /// HTTP status used by the invoke endpoint
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::MalformedRequest | ErrorKind::InvalidArguments | ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::ConfigurationError | ErrorKind::UpstreamUnavailable => 503,
            ErrorKind::AuthError | ErrorKind::UnknownUpstreamError => 502,
            ErrorKind::RateLimited => 429,
            ErrorKind::Timeout => 504,
            ErrorKind::ExecutionFailed => 500,
            // Client closed request
            ErrorKind::Cancelled => 499,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `error` member of a failed invoke envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }

    /// Error for a classified failure, with the kind name in `data.kind`
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        Self {
            code: kind.rpc_code(),
            message,
            data: Some(json!({ "kind": kind.as_str() })),
        }
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(-32700, message)
    }

    pub fn invalid_request(message: String) -> Self {
        Self::from_kind(ErrorKind::MalformedRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method '{}' not found", method),
            data: Some(json!({ "method": method })),
        }
    }

    pub fn invalid_params(message: String) -> Self {
        Self::from_kind(ErrorKind::InvalidArguments, message)
    }
}
