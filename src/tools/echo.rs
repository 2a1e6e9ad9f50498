//! Echo tool

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct EchoInput {
    message: String,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    uppercase: bool,
}

#[derive(Debug, Serialize)]
struct EchoOutput {
    message: String,
    timestamp: String,
}

/// Echoes its input back, for connectivity checks
#[derive(Debug, Default)]
pub struct EchoTool;

impl EchoTool {
    fn echo(input: EchoInput) -> EchoOutput {
        let mut message = if input.uppercase {
            input.message.to_uppercase()
        } else {
            input.message
        };
        if let Some(prefix) = input.prefix.filter(|p| !p.is_empty()) {
            message = format!("{}: {}", prefix, message);
        }
        EchoOutput {
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl Capability for EchoTool {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Tool,
            "echo",
            "Echoes back the input message, optionally with a prefix and/or in uppercase",
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "The message to echo back"},
                    "prefix": {"type": "string", "description": "Optional prefix to add to the echoed message"},
                    "uppercase": {"type": "boolean", "description": "Whether to convert the message to uppercase", "default": false}
                },
                "required": ["message"],
                "additionalProperties": false
            }),
        )
    }

    async fn invoke(&self, arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        let input: EchoInput =
            serde_json::from_value(arguments).map_err(|e| CapabilityError::invalid_arguments(e.to_string()))?;
        serde_json::to_value(Self::echo(input)).map_err(|e| CapabilityError::execution(e.to_string()))
    }
}
