//! Ask the active LLM provider a question

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use crate::providers::ModelRequest;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct AskInput {
    prompt: String,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

impl AskInput {
    fn into_request(self) -> (ModelRequest, Option<String>) {
        let mut request = ModelRequest::from_prompt(self.prompt);
        request.system = self.system.filter(|s| !s.trim().is_empty());
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        (request, self.model)
    }
}

/// Routes a prompt through the request's pinned provider snapshot
#[derive(Debug, Default)]
pub struct AskLlmTool;

#[async_trait]
impl Capability for AskLlmTool {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Tool,
            "ask_llm",
            "Sends a prompt to the configured LLM provider and returns its answer",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "minLength": 1, "description": "The prompt to send"},
                    "system": {"type": "string", "description": "Optional system instructions"},
                    "model": {"type": "string", "description": "Model override for the active provider"},
                    "temperature": {"type": "number", "minimum": 0, "maximum": 2},
                    "max_tokens": {"type": "integer", "minimum": 1}
                },
                "required": ["prompt"],
                "additionalProperties": false
            }),
        )
    }

    async fn invoke(&self, arguments: Value, ctx: &Context) -> Result<Value, CapabilityError> {
        let input: AskInput =
            serde_json::from_value(arguments).map_err(|e| CapabilityError::invalid_arguments(e.to_string()))?;
        let (request, model) = input.into_request();

        let response = ctx.complete_with_model(&request, model.as_deref()).await?;
        Ok(json!({
            "content": response.content,
            "model": response.model,
            "provider": response.provider,
            "usage": response.usage,
        }))
    }
}
