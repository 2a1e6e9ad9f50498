//! Configuration module for AytchMCP
//!
//! This module provides configuration loading, validation and hot reload.

mod config;
pub mod watcher;

// Re-export the main configuration types
pub use config::{
    expand_path, BrandingConfig, Config, ConfigOverrides, DocsConfig, LlmConfig, PromptsConfig,
    ProviderDescriptor, ServerConfig, DEFAULT_CONFIG_PATH,
};
pub use watcher::{reload_config, spawn_config_watcher};
