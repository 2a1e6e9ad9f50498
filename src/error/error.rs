//! Error types and handling for AytchMCP

use crate::providers::ProviderError;
use thiserror::Error;

/// Result type alias for AytchMCP operations
pub type Result<T> = std::result::Result<T, AytchError>;

/// Main error type for AytchMCP
///
/// Request-level failures are not represented here: those travel as
/// [`crate::capability::CapabilityError`] and [`ProviderError`] values and are
/// normalized by the dispatcher. `AytchError` covers everything that happens
/// outside a single invocation (loading configuration, building registries,
/// binding the server).
#[derive(Error, Debug)]
pub enum AytchError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Capability registry errors
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Fatal startup errors
    #[error("Startup error: {message}")]
    Startup { message: String },

    /// Provider errors surfaced outside a request (readiness probes, CLI)
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AytchError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a registry error
    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a startup error
    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Whether this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AytchError::Config { .. }
                | AytchError::Registry { .. }
                | AytchError::Validation { .. }
                | AytchError::Startup { .. }
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AytchError::Config { .. } => "config",
            AytchError::Registry { .. } => "registry",
            AytchError::Validation { .. } => "validation",
            AytchError::Startup { .. } => "startup",
            AytchError::Provider(_) => "provider",
            AytchError::Io(_) => "io",
            AytchError::Serde(_) => "serialization",
            AytchError::Yaml(_) => "yaml",
            AytchError::Http(_) => "http",
            AytchError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_and_categories() {
        let err = AytchError::config("missing provider");
        assert_eq!(err.category(), "config");
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Configuration error: missing provider");

        let err = AytchError::registry("duplicate tool 'echo'");
        assert_eq!(err.category(), "registry");
        assert!(err.to_string().contains("duplicate tool"));
    }

    #[test]
    fn test_io_errors_are_not_fatal() {
        let err: AytchError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.category(), "io");
        assert!(!err.is_fatal());
    }
}
