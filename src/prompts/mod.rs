//! Prompt templates
//!
//! Templates come from the prompts directory (`*.json` and `*.txt`) plus a
//! small built-in set. Each `{placeholder}` becomes a required string
//! argument; `{{` and `}}` render as literal braces.

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid placeholder pattern")
});

/// A named template rendered into a single user message
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub description: String,
    pub template: String,
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    template: String,
}

impl PromptTemplate {
    pub fn new<N: Into<String>, D: Into<String>, T: Into<String>>(name: N, description: D, template: T) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            template: template.into(),
        }
    }

    /// Placeholder names in order of first appearance
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in PLACEHOLDER_REGEX.captures_iter(&self.template) {
            if let Some(name) = caps.get(1) {
                if !names.iter().any(|n| n == name.as_str()) {
                    names.push(name.as_str().to_string());
                }
            }
        }
        names
    }

    pub fn input_schema(&self) -> Value {
        let placeholders = self.placeholders();
        let properties: Map<String, Value> = placeholders
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    json!({"type": "string", "description": format!("Value for {{{}}}", name)}),
                )
            })
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": placeholders,
        })
    }

    /// Fill every placeholder from `arguments`
    pub fn render(&self, arguments: &Map<String, Value>) -> Result<String, CapabilityError> {
        let mut missing = None;
        let rendered = PLACEHOLDER_REGEX.replace_all(&self.template, |caps: &Captures| {
            let Some(name) = caps.get(1) else {
                return caps[0][..1].to_string();
            };
            match arguments.get(name.as_str()) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    missing.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(CapabilityError::invalid_arguments(format!(
                "Missing required argument: {}",
                name
            ))),
            None => Ok(rendered.into_owned()),
        }
    }
}

#[async_trait]
impl Capability for PromptTemplate {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(CapabilityKind::Prompt, &self.name, &self.description, self.input_schema())
    }

    async fn invoke(&self, arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(CapabilityError::invalid_arguments("prompt arguments must be an object")),
        };
        let text = self.render(&arguments)?;
        debug!("Rendered prompt '{}' ({} chars)", self.name, text.len());

        Ok(json!({
            "description": self.description,
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": text},
            }],
        }))
    }
}

/// Templates shipped with the server
pub fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new(
            "summarize",
            "Summarize a piece of text",
            "Summarize the following text concisely, keeping the key points:\n\n{text}",
        ),
        PromptTemplate::new(
            "explain_code",
            "Explain what a piece of code does",
            "Explain what the following {language} code does, step by step:\n\n{code}",
        ),
    ]
}

/// All prompt templates known to the server, keyed by name
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: BTreeMap<String, PromptTemplate>,
}

impl PromptLibrary {
    /// Load the built-ins (optionally) and then every template file in `dir`
    ///
    /// Files override built-ins of the same name. A file that fails to parse
    /// is logged and skipped.
    pub fn load(dir: &Path, include_builtins: bool) -> Self {
        let mut library = Self::default();
        if include_builtins {
            for template in builtin_templates() {
                library.insert(template);
            }
        }

        if !dir.is_dir() {
            warn!("Prompts directory not found: {}", dir.display());
            return library;
        }

        for path in matching_files(dir, "json") {
            match load_json_template(&path) {
                Ok(template) => {
                    info!("Loaded prompt template: {}", template.name);
                    library.insert(template);
                }
                Err(e) => error!("Error loading prompt template from {}: {}", path.display(), e),
            }
        }
        for path in matching_files(dir, "txt") {
            match load_text_template(&path) {
                Ok(template) => {
                    info!("Loaded prompt template: {}", template.name);
                    library.insert(template);
                }
                Err(e) => error!("Error loading prompt template from {}: {}", path.display(), e),
            }
        }
        library
    }

    pub fn insert(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Each template as a registrable capability
    pub fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        self.templates
            .values()
            .map(|t| Arc::new(t.clone()) as Arc<dyn Capability>)
            .collect()
    }
}

fn matching_files(dir: &Path, extension: &str) -> Vec<std::path::PathBuf> {
    let pattern = format!("{}/*.{}", glob::Pattern::escape(&dir.display().to_string()), extension);
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
        Err(e) => {
            warn!("Invalid prompts pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_json_template(path: &Path) -> crate::error::Result<PromptTemplate> {
    let raw = std::fs::read_to_string(path)?;
    let file: PromptFile = serde_json::from_str(&raw)?;
    Ok(PromptTemplate::new(
        file.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| file_stem(path)),
        file.description.unwrap_or_default(),
        file.template,
    ))
}

fn load_text_template(path: &Path) -> crate::error::Result<PromptTemplate> {
    let raw = std::fs::read_to_string(path)?;
    Ok(PromptTemplate::new(file_stem(path), "", raw))
}
