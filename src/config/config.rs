use crate::error::{AytchError, Result};
use crate::providers::ProviderId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default configuration location when neither the CLI nor `CONFIG_PATH` names one
pub const DEFAULT_CONFIG_PATH: &str = "./config";

/// Names of the optional per-section files merged from a configuration directory
const SECTION_FILES: [&str; 3] = ["branding", "llm", "server"];
const CONFIG_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identity reported by discovery
    #[serde(default)]
    pub branding: BrandingConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Built-in tools to register, by name
    #[serde(default = "default_tools_enabled")]
    pub tools_enabled: Vec<String>,
    /// Built-in resources to register, by name
    #[serde(default = "default_resources_enabled")]
    pub resources_enabled: Vec<String>,
    /// Prompt library configuration
    #[serde(default)]
    pub prompts: PromptsConfig,
    /// Documentation resource configuration
    #[serde(default)]
    pub docs: DocsConfig,
}

/// Branding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrandingConfig {
    #[serde(default = "default_brand_name")]
    pub name: String,
    #[serde(default = "default_brand_description")]
    pub description: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default = "default_secondary_color")]
    pub secondary_color: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Debug mode forces debug logging
    #[serde(default)]
    pub debug: bool,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Upper bound for a whole request, in seconds
    #[serde(default = "default_request_timeout", alias = "timeout")]
    pub request_timeout_secs: u64,
    /// Time a cancelled handler gets to observe its token, in milliseconds
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,
    /// Watch the configuration location and reload providers on change
    #[serde(default)]
    pub hot_reload: bool,
}

/// Settings of one provider backend
///
/// The credential is referenced by environment variable name; the secret
/// itself never appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderDescriptor {
    /// Endpoint override, the adapter's default when absent
    #[serde(default, alias = "api_base_url")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    #[serde(default, alias = "api_key_env_var")]
    pub api_key_env: String,
    /// Model used when a call gives no override
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable consulted when `model` is not set
    #[serde(default, alias = "model_env_var")]
    pub model_env: Option<String>,
    /// Timeout for one upstream round trip, in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Extra body parameters sent with every call
    #[serde(default)]
    pub additional_params: Map<String, Value>,
}

/// LLM provider selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawLlmConfig")]
pub struct LlmConfig {
    /// Provider that serves requests
    pub active: ProviderId,
    /// Descriptors of every configured provider
    pub providers: HashMap<ProviderId, ProviderDescriptor>,
}

/// Accepted input shape for the `llm` section
///
/// Besides the `providers` table this accepts the flat single-provider
/// layout (`provider`, `model`, `api_key_env_var`, `api_base_url`,
/// `additional_params`), whose fields apply to the active provider.
#[derive(Debug, Deserialize)]
struct RawLlmConfig {
    #[serde(default, alias = "provider")]
    active: Option<ProviderId>,
    #[serde(default)]
    providers: Option<HashMap<ProviderId, ProviderDescriptor>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "api_key_env_var")]
    api_key_env: Option<String>,
    #[serde(default, alias = "api_base_url")]
    base_url: Option<String>,
    #[serde(default)]
    additional_params: Option<Map<String, Value>>,
}

impl From<RawLlmConfig> for LlmConfig {
    fn from(raw: RawLlmConfig) -> Self {
        let active = raw.active.unwrap_or(ProviderId::OpenAi);
        let mut providers = raw.providers.unwrap_or_else(default_providers);

        // Blank credential references fall back to the provider's conventional variable
        for (id, descriptor) in providers.iter_mut() {
            if descriptor.api_key_env.trim().is_empty() {
                descriptor.api_key_env = ProviderDescriptor::default_for(*id).api_key_env;
            }
        }

        let has_flat_fields = raw.model.is_some()
            || raw.api_key_env.is_some()
            || raw.base_url.is_some()
            || raw.additional_params.is_some();
        if has_flat_fields {
            let descriptor = providers
                .entry(active)
                .or_insert_with(|| ProviderDescriptor::default_for(active));
            if let Some(model) = raw.model {
                descriptor.model = Some(model);
            }
            if let Some(key_env) = raw.api_key_env.filter(|k| !k.trim().is_empty()) {
                descriptor.api_key_env = key_env;
            }
            if raw.base_url.is_some() {
                descriptor.base_url = raw.base_url;
            }
            if let Some(params) = raw.additional_params {
                descriptor.additional_params = params;
            }
        }

        Self { active, providers }
    }
}

/// Prompt library configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptsConfig {
    /// Directory scanned for `*.json` and `*.txt` prompt templates
    #[serde(default = "default_prompts_dir")]
    pub dir: String,
    /// Register the built-in templates
    #[serde(default = "default_true")]
    pub builtins: bool,
}

/// Documentation resource configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocsConfig {
    /// Directory scanned for markdown documents
    #[serde(default = "default_docs_dir")]
    pub dir: String,
}

/// Values supplied on the command line, highest precedence
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub debug: bool,
}

// Default value functions
fn default_brand_name() -> String { "Aytch4K MCP".to_string() }
fn default_brand_description() -> String { "Aytch4K Model Context Protocol Server".to_string() }
fn default_primary_color() -> String { "#4A90E2".to_string() }
fn default_secondary_color() -> String { "#50E3C2".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_log_level() -> String { "info".to_string() }
fn default_max_request_size() -> usize { 10 * 1024 * 1024 }
fn default_request_timeout() -> u64 { 60 }
fn default_cancel_grace() -> u64 { 250 }
fn default_provider_timeout() -> u64 { 30 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 500 }
fn default_prompts_dir() -> String { "./prompts".to_string() }
fn default_docs_dir() -> String { "./docs".to_string() }
fn default_true() -> bool { true }

fn default_tools_enabled() -> Vec<String> {
    ["echo", "calculator", "weather", "ask_llm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_resources_enabled() -> Vec<String> {
    ["system_info", "documentation", "llm_config"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_providers() -> HashMap<ProviderId, ProviderDescriptor> {
    ProviderId::ALL
        .iter()
        .map(|id| (*id, ProviderDescriptor::default_for(*id)))
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            branding: BrandingConfig::default(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            tools_enabled: default_tools_enabled(),
            resources_enabled: default_resources_enabled(),
            prompts: PromptsConfig::default(),
            docs: DocsConfig::default(),
        }
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            name: default_brand_name(),
            description: default_brand_description(),
            logo_url: None,
            primary_color: default_primary_color(),
            secondary_color: default_secondary_color(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            debug: false,
            max_request_size: default_max_request_size(),
            request_timeout_secs: default_request_timeout(),
            cancel_grace_ms: default_cancel_grace(),
            hot_reload: false,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            active: ProviderId::OpenAi,
            providers: default_providers(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
            builtins: true,
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: default_docs_dir(),
        }
    }
}

impl ProviderDescriptor {
    /// Conventional settings for a provider
    pub fn default_for(id: ProviderId) -> Self {
        let (api_key_env, model, model_env) = match id {
            ProviderId::OpenAi => ("OPENAI_API_KEY", Some("gpt-4"), None),
            ProviderId::Anthropic => ("ANTHROPIC_API_KEY", Some("claude-3-5-sonnet-20241022"), None),
            ProviderId::OpenRouter => ("OPENROUTER_API_KEY", None, Some("OPENROUTER_MODEL")),
            ProviderId::GenericChat => ("NINJACHAT_API_KEY", None, Some("NINJACHAT_MODEL")),
        };
        Self {
            base_url: None,
            api_key_env: api_key_env.to_string(),
            model: model.map(str::to_string),
            model_env: model_env.map(str::to_string),
            timeout_secs: default_provider_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_tokens: None,
            temperature: None,
            additional_params: Map::new(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AytchError::config("Server host cannot be empty"));
        }
        if self.port == 0 {
            return Err(AytchError::config("Server port cannot be 0"));
        }
        if self.max_request_size == 0 {
            return Err(AytchError::config("max_request_size must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(AytchError::config("request_timeout_secs must be greater than 0"));
        }
        Ok(())
    }
}

impl LlmConfig {
    /// Validate provider descriptors against the request timeout
    pub fn validate(&self, request_timeout_secs: u64) -> Result<()> {
        if !self.providers.contains_key(&self.active) {
            return Err(AytchError::config(format!(
                "Active provider '{}' has no descriptor in llm.providers",
                self.active
            )));
        }

        for (id, descriptor) in &self.providers {
            if descriptor.api_key_env.trim().is_empty() {
                return Err(AytchError::config(format!(
                    "Provider '{}' must name the environment variable holding its API key",
                    id
                )));
            }
            if descriptor.timeout_secs == 0 {
                return Err(AytchError::config(format!(
                    "Provider '{}' timeout_secs must be greater than 0",
                    id
                )));
            }
            if descriptor.timeout_secs >= request_timeout_secs {
                return Err(AytchError::config(format!(
                    "Provider '{}' timeout ({}s) must be less than the request timeout ({}s)",
                    id, descriptor.timeout_secs, request_timeout_secs
                )));
            }
            if let Some(url) = &descriptor.base_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(AytchError::config(format!(
                        "Provider '{}' base_url must be an http(s) URL, got '{}'",
                        id, url
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load .env files in order of precedence
    fn load_env_files() {
        for env_file in [".env", ".env.local"] {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }
    }

    /// Resolve the configuration location: explicit path, `CONFIG_PATH`, default
    pub fn resolve_path(path: Option<&str>) -> PathBuf {
        let raw = path
            .map(str::to_string)
            .or_else(|| std::env::var("CONFIG_PATH").ok().filter(|p| !p.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        expand_path(&raw)
    }

    /// Load configuration with environment variables and CLI overrides
    ///
    /// Precedence: defaults < .env < files < environment < CLI.
    pub fn load(path: Option<&str>, overrides: &ConfigOverrides) -> Result<Self> {
        Self::load_env_files();

        let location = Self::resolve_path(path);
        let mut config = Self::from_location(&location)?;

        config.apply_environment_overrides()?;
        config.apply_overrides(overrides);

        config.validate()?;
        Ok(config)
    }

    /// Read a configuration directory or file without overrides or validation
    pub fn from_location(location: &Path) -> Result<Self> {
        if location.is_dir() {
            Self::from_directory(location)
        } else if location.is_file() {
            let value = read_value(location)?;
            serde_json::from_value(value).map_err(|e| {
                AytchError::config(format!("Invalid configuration in {}: {}", location.display(), e))
            })
        } else {
            tracing::warn!("Configuration not found at {}, using defaults", location.display());
            Ok(Self::default())
        }
    }

    /// `config.*` first, then the optional section files replace their sections
    fn from_directory(dir: &Path) -> Result<Self> {
        let mut root = match find_with_extensions(dir, "config") {
            Some(path) => {
                tracing::debug!("Reading {}", path.display());
                read_value(&path)?
            }
            None => Value::Object(Map::new()),
        };

        let Value::Object(sections) = &mut root else {
            return Err(AytchError::config(format!(
                "{}/config must contain an object",
                dir.display()
            )));
        };

        for section in SECTION_FILES {
            if let Some(path) = find_with_extensions(dir, section) {
                tracing::debug!("Reading {}", path.display());
                sections.insert(section.to_string(), read_value(&path)?);
            }
        }

        serde_json::from_value(root).map_err(|e| {
            AytchError::config(format!("Invalid configuration in {}: {}", dir.display(), e))
        })
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("MCP_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }

        if let Ok(port_str) = std::env::var("MCP_PORT") {
            if !port_str.is_empty() {
                self.server.port = port_str.parse().map_err(|e| {
                    AytchError::config(format!("Invalid MCP_PORT environment variable: {}", e))
                })?;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.is_empty() {
                self.server.log_level = level;
            }
        }

        if let Ok(debug) = std::env::var("DEBUG") {
            self.server.debug = matches!(debug.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            if !provider.is_empty() {
                self.llm.active = provider.parse().map_err(|e: String| {
                    AytchError::config(format!("Invalid LLM_PROVIDER environment variable: {}", e))
                })?;
            }
        }

        Ok(())
    }

    /// Apply CLI overrides (highest precedence)
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(level) = &overrides.log_level {
            self.server.log_level = level.clone();
        }
        if overrides.debug {
            self.server.debug = true;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.llm.validate(self.server.request_timeout_secs)?;

        if self.branding.name.trim().is_empty() {
            return Err(AytchError::config("branding.name cannot be empty"));
        }
        Ok(())
    }

    /// Effective log level, `debug` when debug mode is on
    pub fn effective_log_level(&self) -> String {
        if self.server.debug {
            "debug".to_string()
        } else {
            self.server.log_level.to_ascii_lowercase()
        }
    }

    pub fn prompts_dir(&self) -> PathBuf {
        expand_path(&self.prompts.dir)
    }

    pub fn docs_dir(&self) -> PathBuf {
        expand_path(&self.docs.dir)
    }

    /// Write a default configuration directory
    ///
    /// Existing files are left untouched. Returns the files that were written.
    pub fn init_dir(dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let defaults = Self::default();
        let files: [(&str, Value); 4] = [
            (
                "config.json",
                serde_json::json!({
                    "tools_enabled": defaults.tools_enabled,
                    "resources_enabled": defaults.resources_enabled,
                    "prompts": defaults.prompts,
                    "docs": defaults.docs,
                }),
            ),
            ("branding.json", serde_json::to_value(&defaults.branding)?),
            ("llm.json", serde_json::to_value(&defaults.llm)?),
            ("server.json", serde_json::to_value(&defaults.server)?),
        ];

        let mut written = Vec::new();
        for (name, content) in files {
            let path = dir.join(name);
            if path.exists() {
                tracing::info!("Keeping existing {}", path.display());
                continue;
            }
            std::fs::write(&path, serde_json::to_string_pretty(&content)?)?;
            tracing::info!("Created configuration file: {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

/// Expand `~` and `$VAR` in a configured path, leaving it as-is on failure
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!("Could not expand path '{}': {}", raw, e);
            PathBuf::from(raw)
        }
    }
}

fn find_with_extensions(dir: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.is_file())
}

/// Parse a file as JSON or YAML by extension
fn read_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AytchError::config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
            AytchError::config(format!("Failed to parse {}: {}", path.display(), e))
        }),
        _ => serde_json::from_str(&content).map_err(|e| {
            AytchError::config(format!("Failed to parse {}: {}", path.display(), e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.cancel_grace_ms, 250);
        assert_eq!(config.llm.providers.len(), 4);
    }

    #[test]
    fn test_flat_llm_section_applies_to_active_provider() {
        let llm: LlmConfig = serde_json::from_str(
            r#"{"provider": "anthropic", "model": "claude-3-opus-20240229", "api_key_env_var": "MY_KEY"}"#,
        )
        .unwrap();

        assert_eq!(llm.active, ProviderId::Anthropic);
        let descriptor = &llm.providers[&ProviderId::Anthropic];
        assert_eq!(descriptor.model.as_deref(), Some("claude-3-opus-20240229"));
        assert_eq!(descriptor.api_key_env, "MY_KEY");
    }

    #[test]
    fn test_provider_aliases() {
        let llm: LlmConfig = serde_json::from_str(r#"{"active": "ninjachat"}"#).unwrap();
        assert_eq!(llm.active, ProviderId::GenericChat);
        assert!(serde_json::from_str::<LlmConfig>(r#"{"active": "mystery"}"#).is_err());
    }

    #[test]
    fn test_provider_timeout_must_fit_request_timeout() {
        let mut config = Config::default();
        config.server.request_timeout_secs = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be less than the request timeout"));
    }

    #[test]
    fn test_directory_sections_merge() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"tools_enabled": ["echo"]}"#).unwrap();
        std::fs::write(dir.path().join("server.yaml"), "port: 9100\nhot_reload: true\n").unwrap();
        std::fs::write(dir.path().join("branding.json"), r#"{"name": "Test MCP"}"#).unwrap();

        let config = Config::from_location(dir.path()).unwrap();
        assert_eq!(config.tools_enabled, vec!["echo".to_string()]);
        assert_eq!(config.server.port, 9100);
        assert!(config.server.hot_reload);
        assert_eq!(config.branding.name, "Test MCP");
        assert_eq!(config.resources_enabled, default_resources_enabled());
    }

    #[test]
    fn test_init_dir_round_trips() {
        let dir = TempDir::new().unwrap();
        let written = Config::init_dir(dir.path()).unwrap();
        assert_eq!(written.len(), 4);

        let config = Config::from_location(dir.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.llm, LlmConfig::default());

        // Second run keeps existing files
        assert!(Config::init_dir(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            log_level: None,
            debug: true,
        });
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.effective_log_level(), "debug");
    }
}
