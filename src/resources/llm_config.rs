//! Active LLM provider configuration resource

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

pub const URI: &str = "config://llm";

/// Reports provider readiness from the request's pinned snapshot
///
/// Credential values never appear here; only the status rows do.
#[derive(Debug, Default)]
pub struct LlmConfigResource;

#[async_trait]
impl Capability for LlmConfigResource {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Resource,
            "llm_config",
            "Reports the active LLM provider, its model and per-provider readiness",
            json!({"type": "object", "properties": {}}),
        )
        .with_uri(URI)
    }

    async fn invoke(&self, _arguments: Value, ctx: &Context) -> Result<Value, CapabilityError> {
        let providers = ctx.provider_status();
        let active = ctx.active_provider();
        let model = providers
            .iter()
            .find(|status| status.id == active)
            .and_then(|status| status.model.clone());

        Ok(json!({
            "active": active,
            "model": model,
            "providers": providers,
        }))
    }
}
