//! Built-in resources

pub mod documentation;
pub mod llm_config;
pub mod system_info;

pub use documentation::DocumentationResource;
pub use llm_config::LlmConfigResource;
pub use system_info::SystemInfoResource;

use crate::capability::Capability;
use crate::config::Config;
use std::sync::Arc;

/// Names accepted in `resources_enabled`
pub const AVAILABLE_RESOURCES: [&str; 3] = ["system_info", "documentation", "llm_config"];

/// Construct a built-in resource by name
pub fn builtin(name: &str, config: &Config) -> Option<Arc<dyn Capability>> {
    match name {
        "system_info" => Some(Arc::new(SystemInfoResource)),
        "documentation" => Some(Arc::new(DocumentationResource::new(config.docs_dir()))),
        "llm_config" => Some(Arc::new(LlmConfigResource)),
        _ => None,
    }
}
