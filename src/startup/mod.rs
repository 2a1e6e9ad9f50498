//! Startup: capability registry assembly and the startup summary

pub mod logger;

pub use logger::StartupLogger;

use crate::capability::{Capability, CapabilityRegistry};
use crate::config::Config;
use crate::error::Result;
use crate::prompts::PromptLibrary;
use crate::{resources, tools};
use std::sync::Arc;
use tracing::{debug, warn};

/// Register every enabled built-in plus the prompt library
///
/// Unknown names are skipped with a warning. A duplicate name or a schema
/// that does not compile aborts startup.
pub fn build_capability_registry(config: &Config) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    for name in &config.tools_enabled {
        register_named(&mut registry, "tool", name, tools::builtin(name))?;
    }
    for name in &config.resources_enabled {
        register_named(&mut registry, "resource", name, resources::builtin(name, config))?;
    }

    let library = PromptLibrary::load(&config.prompts_dir(), config.prompts.builtins);
    for prompt in library.capabilities() {
        registry.register(prompt)?;
    }

    debug!("Capability registry holds {} entries", registry.len());
    Ok(registry)
}

fn register_named(
    registry: &mut CapabilityRegistry,
    kind: &str,
    name: &str,
    capability: Option<Arc<dyn Capability>>,
) -> Result<()> {
    match capability {
        Some(capability) => registry.register(capability),
        None => {
            warn!("Unknown {} '{}' in configuration, skipping", kind, name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityKind;
    use tempfile::TempDir;

    fn config_with(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.prompts.dir = dir.path().join("prompts").display().to_string();
        config.docs.dir = dir.path().join("docs").display().to_string();
        config
    }

    #[test]
    fn test_defaults_register_every_builtin() {
        let dir = TempDir::new().unwrap();
        let registry = build_capability_registry(&config_with(&dir)).unwrap();
        assert_eq!(registry.names(CapabilityKind::Tool), vec!["ask_llm", "calculator", "echo", "weather"]);
        assert_eq!(
            registry.names(CapabilityKind::Resource),
            vec!["documentation", "llm_config", "system_info"]
        );
        assert_eq!(registry.names(CapabilityKind::Prompt), vec!["explain_code", "summarize"]);
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with(&dir);
        config.tools_enabled = vec!["echo".to_string(), "teleport".to_string()];
        config.resources_enabled.clear();
        config.prompts.builtins = false;

        let registry = build_capability_registry(&config).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_names_are_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with(&dir);
        config.tools_enabled = vec!["echo".to_string(), "echo".to_string()];

        assert!(build_capability_registry(&config).is_err());
    }
}
