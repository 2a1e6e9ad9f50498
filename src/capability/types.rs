//! Capability contract shared by resources, tools and prompts

use crate::mcp::{Context, ErrorKind};
use crate::providers::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The three capability catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Resource,
    Tool,
    Prompt,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [CapabilityKind::Resource, CapabilityKind::Tool, CapabilityKind::Prompt];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Resource => "resource",
            CapabilityKind::Tool => "tool",
            CapabilityKind::Prompt => "prompt",
        }
    }

    /// Catalog name used by discovery
    pub fn plural(&self) -> &'static str {
        match self {
            CapabilityKind::Resource => "resources",
            CapabilityKind::Tool => "tools",
            CapabilityKind::Prompt => "prompts",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resource" | "resources" => Ok(CapabilityKind::Resource),
            "tool" | "tools" => Ok(CapabilityKind::Tool),
            "prompt" | "prompts" => Ok(CapabilityKind::Prompt),
            other => Err(format!("unknown capability kind '{}'", other)),
        }
    }
}

/// Discovery-facing description of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub name: String,
    pub kind: CapabilityKind,
    pub description: String,
    /// JSON Schema the arguments must satisfy
    pub input_schema: Value,
    /// Address of a resource, e.g. `system://info`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl CapabilityMetadata {
    pub fn new<N: Into<String>, D: Into<String>>(
        kind: CapabilityKind,
        name: N,
        description: D,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            input_schema,
            uri: None,
        }
    }

    pub fn with_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// Failure reported by a capability handler
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct CapabilityError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Handler-level failure
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::ExecutionFailed, message)
    }

    pub fn invalid_arguments<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::InvalidArguments, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }
}

impl From<ProviderError> for CapabilityError {
    fn from(error: ProviderError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

/// Normalized outcome of one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(Value),
    Failure { kind: ErrorKind, message: String },
    Cancelled,
}

impl From<Result<Value, CapabilityError>> for InvocationResult {
    fn from(result: Result<Value, CapabilityError>) -> Self {
        match result {
            Ok(payload) => InvocationResult::Success(payload),
            Err(e) if e.kind == ErrorKind::Cancelled => InvocationResult::Cancelled,
            Err(e) => InvocationResult::Failure {
                kind: e.kind,
                message: e.message,
            },
        }
    }
}

/// A registered resource, tool or prompt
///
/// Arguments reaching `invoke` have already been validated against
/// `metadata().input_schema`.
#[async_trait]
pub trait Capability: Send + Sync {
    fn metadata(&self) -> CapabilityMetadata;

    async fn invoke(&self, arguments: Value, ctx: &Context) -> Result<Value, CapabilityError>;
}

/// Required string argument
pub fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, CapabilityError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::invalid_arguments(format!("missing required argument '{}'", key)))
}

/// Optional string argument, `None` when absent or null
pub fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}
