//! Indirect credential resolution
//!
//! Descriptors carry the *name* of an environment variable. The secret
//! value is only looked up when an adapter is about to make a call.

use super::ProviderError;
use secrecy::SecretString;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Source of secret values keyed by reference name
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Resolve a reference to its secret, `None` when missing or blank
    fn resolve(&self, reference: &str) -> Option<SecretString>;
}

/// Resolves references from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn resolve(&self, reference: &str) -> Option<SecretString> {
        std::env::var(reference)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(SecretString::new)
    }
}

/// Fixed set of credentials, used by tests and embedders
#[derive(Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference/value pair
    pub fn with<K: Into<String>, V: Into<String>>(mut self, reference: K, value: V) -> Self {
        self.values.insert(reference.into(), value.into());
        self
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("references", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialSource for StaticCredentials {
    fn resolve(&self, reference: &str) -> Option<SecretString> {
        self.values
            .get(reference)
            .filter(|value| !value.trim().is_empty())
            .map(|value| SecretString::new(value.clone()))
    }
}

/// A credential reference bound to the source that resolves it
#[derive(Clone, Debug)]
pub struct Credential {
    reference: String,
    source: Arc<dyn CredentialSource>,
}

impl Credential {
    pub fn new<S: Into<String>>(reference: S, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            reference: reference.into(),
            source,
        }
    }

    /// Name of the environment variable holding the secret
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Whether the reference currently resolves to a non-empty value
    pub fn is_resolvable(&self) -> bool {
        self.source.resolve(&self.reference).is_some()
    }

    /// Resolve the secret, failing closed when it is missing
    pub fn resolve(&self) -> Result<SecretString, ProviderError> {
        self.source.resolve(&self.reference).ok_or_else(|| {
            ProviderError::auth(format!(
                "credential reference '{}' does not resolve to a value",
                self.reference
            ))
        })
    }
}
