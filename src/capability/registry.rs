//! Capability registry
//!
//! One catalog per kind, keyed by name. Input schemas are compiled once at
//! registration; a schema that does not compile is rejected there.

use super::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::error::{AytchError, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A capability with its compiled argument schema
#[derive(Clone)]
pub struct RegisteredCapability {
    metadata: CapabilityMetadata,
    capability: Arc<dyn Capability>,
    schema: Arc<JSONSchema>,
}

impl RegisteredCapability {
    pub fn metadata(&self) -> &CapabilityMetadata {
        &self.metadata
    }

    pub fn capability(&self) -> Arc<dyn Capability> {
        self.capability.clone()
    }

    /// Check arguments against the input schema
    pub fn validate(&self, arguments: &Value) -> std::result::Result<(), CapabilityError> {
        match self.schema.validate(arguments) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let details: Vec<String> = errors.map(|e| e.to_string()).collect();
                Err(CapabilityError::invalid_arguments(format!(
                    "Invalid arguments for {} '{}': {}",
                    self.metadata.kind,
                    self.metadata.name,
                    details.join("; ")
                )))
            }
        }
    }
}

impl std::fmt::Debug for RegisteredCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCapability")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Catalog of resources, tools and prompts
#[derive(Debug, Default, Clone)]
pub struct CapabilityRegistry {
    catalogs: BTreeMap<CapabilityKind, BTreeMap<String, RegisteredCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its metadata name
    ///
    /// Fails on a duplicate (kind, name), a duplicate resource URI or an
    /// input schema that does not compile. A failed registration leaves the
    /// registry unchanged.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let metadata = capability.metadata();

        if metadata.name.trim().is_empty() {
            return Err(AytchError::registry(format!("{} name cannot be empty", metadata.kind)));
        }

        let catalog = self.catalogs.entry(metadata.kind).or_default();
        if catalog.contains_key(&metadata.name) {
            return Err(AytchError::registry(format!(
                "{} '{}' is already registered",
                metadata.kind, metadata.name
            )));
        }

        if let Some(uri) = &metadata.uri {
            if catalog.values().any(|c| c.metadata.uri.as_deref() == Some(uri.as_str())) {
                return Err(AytchError::registry(format!(
                    "{} URI '{}' is already registered",
                    metadata.kind, uri
                )));
            }
        }

        let schema = JSONSchema::compile(&metadata.input_schema).map_err(|e| {
            AytchError::validation(format!(
                "Invalid JSON Schema for {} '{}': {}",
                metadata.kind, metadata.name, e
            ))
        })?;

        debug!("Registered {} '{}'", metadata.kind, metadata.name);
        catalog.insert(
            metadata.name.clone(),
            RegisteredCapability {
                metadata,
                capability,
                schema: Arc::new(schema),
            },
        );
        Ok(())
    }

    /// Registered entry for (kind, name)
    pub fn entry(&self, kind: CapabilityKind, name: &str) -> std::result::Result<&RegisteredCapability, CapabilityError> {
        self.catalogs
            .get(&kind)
            .and_then(|catalog| catalog.get(name))
            .ok_or_else(|| CapabilityError::not_found(format!("{} '{}' not found", kind, name)))
    }

    pub fn lookup(&self, kind: CapabilityKind, name: &str) -> std::result::Result<Arc<dyn Capability>, CapabilityError> {
        self.entry(kind, name).map(RegisteredCapability::capability)
    }

    /// Resource registered under `uri`
    pub fn lookup_resource_by_uri(&self, uri: &str) -> std::result::Result<&RegisteredCapability, CapabilityError> {
        self.catalogs
            .get(&CapabilityKind::Resource)
            .and_then(|catalog| {
                catalog
                    .values()
                    .find(|c| c.metadata.uri.as_deref() == Some(uri))
            })
            .ok_or_else(|| CapabilityError::not_found(format!("resource '{}' not found", uri)))
    }

    pub fn validate_arguments(
        &self,
        kind: CapabilityKind,
        name: &str,
        arguments: &Value,
    ) -> std::result::Result<(), CapabilityError> {
        self.entry(kind, name)?.validate(arguments)
    }

    /// Metadata of every capability of `kind`, sorted by name
    pub fn list(&self, kind: CapabilityKind) -> Vec<CapabilityMetadata> {
        self.catalogs
            .get(&kind)
            .map(|catalog| catalog.values().map(|c| c.metadata.clone()).collect())
            .unwrap_or_default()
    }

    pub fn names(&self, kind: CapabilityKind) -> Vec<String> {
        self.catalogs
            .get(&kind)
            .map(|catalog| catalog.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.catalogs.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{Context, ErrorKind};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed {
        metadata: CapabilityMetadata,
        answer: &'static str,
    }

    #[async_trait]
    impl Capability for Fixed {
        fn metadata(&self) -> CapabilityMetadata {
            self.metadata.clone()
        }

        async fn invoke(&self, _arguments: Value, _ctx: &Context) -> std::result::Result<Value, CapabilityError> {
            Ok(json!(self.answer))
        }
    }

    fn tool(name: &str, answer: &'static str) -> Arc<dyn Capability> {
        Arc::new(Fixed {
            metadata: CapabilityMetadata::new(
                CapabilityKind::Tool,
                name,
                "test tool",
                json!({"type": "object", "properties": {"x": {"type": "integer"}}, "required": ["x"]}),
            ),
            answer,
        })
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = CapabilityRegistry::new();
        registry.register(tool("add", "first")).unwrap();
        assert!(registry.register(tool("add", "second")).is_err());

        assert_eq!(registry.len(), 1);
        let entry = registry.entry(CapabilityKind::Tool, "add").unwrap();
        assert_eq!(entry.metadata().description, "test tool");
    }

    #[test]
    fn test_same_name_in_different_kinds() {
        let mut registry = CapabilityRegistry::new();
        registry.register(tool("summarize", "tool")).unwrap();
        let prompt = Arc::new(Fixed {
            metadata: CapabilityMetadata::new(CapabilityKind::Prompt, "summarize", "prompt", json!({"type": "object"})),
            answer: "prompt",
        });
        registry.register(prompt).unwrap();
        assert_eq!(registry.list(CapabilityKind::Tool).len(), 1);
        assert_eq!(registry.list(CapabilityKind::Prompt).len(), 1);
    }

    #[test]
    fn test_lookup_unknown_is_not_found() {
        let registry = CapabilityRegistry::new();
        let err = registry.lookup(CapabilityKind::Tool, "missing").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        let mut registry = CapabilityRegistry::new();
        let broken = Arc::new(Fixed {
            metadata: CapabilityMetadata::new(CapabilityKind::Tool, "broken", "", json!({"type": 12})),
            answer: "",
        });
        assert!(registry.register(broken).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_argument_validation() {
        let mut registry = CapabilityRegistry::new();
        registry.register(tool("add", "ok")).unwrap();

        registry
            .validate_arguments(CapabilityKind::Tool, "add", &json!({"x": 1}))
            .unwrap();
        let err = registry
            .validate_arguments(CapabilityKind::Tool, "add", &json!({}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
    }
}
