//! Markdown documentation resource

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub const URI: &str = "docs://content";

#[derive(Debug, Default, Deserialize)]
struct DocumentationQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentationEntry {
    pub title: String,
    pub content: String,
    pub path: String,
    pub tags: Vec<String>,
    pub last_modified: Option<String>,
}

/// Serves markdown files under the docs directory
#[derive(Debug, Clone)]
pub struct DocumentationResource {
    root: PathBuf,
}

impl DocumentationResource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(root: &Path, query: Option<&str>, tags: &[String]) -> Vec<DocumentationEntry> {
        if !root.is_dir() {
            return Vec::new();
        }
        let query = query.map(str::to_lowercase).filter(|q| !q.is_empty());

        let mut entries = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable documentation entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }

            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };

            let file_tags = extract_tags(&content);
            if !tags.is_empty() && !tags.iter().any(|t| file_tags.contains(t)) {
                continue;
            }

            let title = extract_title(&content);
            if let Some(q) = &query {
                if !content.to_lowercase().contains(q.as_str()) && !title.to_lowercase().contains(q.as_str()) {
                    continue;
                }
            }

            let last_modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

            entries.push(DocumentationEntry {
                title,
                path: path.strip_prefix(root).unwrap_or(path).display().to_string(),
                content,
                tags: file_tags,
                last_modified,
            });
        }
        entries
    }
}

/// Front matter between leading `---` fences, if present
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let body = &rest[end + 4..];
            (Some(&rest[..end]), body.trim_start_matches(['\r', '\n']))
        }
        None => (None, content),
    }
}

fn extract_title(content: &str) -> String {
    let (_, body) = split_front_matter(content);
    body.lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '#' || c == ' ')
        .to_string()
}

/// `tags: [a, b]` or `tags: a, b` in the front matter
fn extract_tags(content: &str) -> Vec<String> {
    let Some(front_matter) = split_front_matter(content).0 else {
        return Vec::new();
    };
    let Some(raw) = front_matter
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("tags:"))
    else {
        return Vec::new();
    };

    let raw = raw.trim();
    let list = raw
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(raw);
    list.split(',')
        .map(|tag| tag.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

#[async_trait]
impl Capability for DocumentationResource {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Resource,
            "documentation",
            "Provides documentation for the MCP server and its components",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Case-insensitive text filter"},
                    "tags": {"type": "array", "items": {"type": "string"}, "description": "Match entries carrying any of these tags"}
                }
            }),
        )
        .with_uri(URI)
    }

    async fn invoke(&self, arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        let request: DocumentationQuery =
            serde_json::from_value(arguments).map_err(|e| CapabilityError::invalid_arguments(e.to_string()))?;

        let root = self.root.clone();
        let query = request.query.clone();
        let tags = request.tags.unwrap_or_default();
        let entries = tokio::task::spawn_blocking(move || Self::scan(&root, query.as_deref(), &tags))
            .await
            .map_err(|e| CapabilityError::execution(format!("documentation scan failed: {}", e)))?;

        Ok(json!({
            "total_entries": entries.len(),
            "entries": entries,
            "query": request.query,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_tags_in_both_forms() {
        assert_eq!(extract_tags("---\ntags: [api, 'setup']\n---\n# Title"), vec!["api", "setup"]);
        assert_eq!(extract_tags("---\ntags: api, \"llm\"\n---\nbody"), vec!["api", "llm"]);
        assert!(extract_tags("# No front matter\ntags: x").is_empty());
    }

    #[test]
    fn test_title_skips_front_matter() {
        assert_eq!(extract_title("# Getting Started\nbody"), "Getting Started");
        assert_eq!(extract_title("---\ntags: [a]\n---\n## Providers\n"), "Providers");
    }

    #[test]
    fn test_scan_filters_by_query_and_tags() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "intro.md", "---\ntags: [start]\n---\n# Intro\nWelcome to the server.");
        write(dir.path(), "guides/providers.md", "# Providers\nConfigure OpenAI and Anthropic.");
        write(dir.path(), "notes.txt", "# Ignored\nopenai");

        let all = DocumentationResource::scan(dir.path(), None, &[]);
        assert_eq!(all.len(), 2);

        let by_query = DocumentationResource::scan(dir.path(), Some("OPENAI"), &[]);
        assert_eq!(by_query.len(), 1);
        assert_eq!(by_query[0].title, "Providers");
        assert!(by_query[0].path.ends_with("providers.md"));

        let by_tag = DocumentationResource::scan(dir.path(), None, &["start".to_string()]);
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].tags, vec!["start"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let entries = DocumentationResource::scan(Path::new("/nonexistent/docs"), None, &[]);
        assert!(entries.is_empty());
    }
}
