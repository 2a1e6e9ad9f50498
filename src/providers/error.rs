//! Provider error taxonomy
//!
//! Every adapter converts its backend's failure shapes into a
//! [`ProviderError`] at the adapter boundary. Nothing provider-specific
//! crosses that line.

use crate::mcp::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Normalized failure of an upstream model call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Credentials missing, rejected or lacking permission
    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    /// Upstream asked us to slow down
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// Upstream rejected the request shape or model
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Upstream unreachable or overloaded
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// Round trip exceeded its time budget
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// Anything the adapter could not classify more precisely
    #[error("Unknown upstream error: {message}")]
    UnknownUpstreamError { message: String },

    /// The active provider could not be resolved
    #[error("Provider configuration error: {message}")]
    Configuration { message: String },

    /// The caller cancelled the invocation
    #[error("Invocation cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn rate_limited<S: Into<String>>(retry_after: Option<Duration>, message: S) -> Self {
        Self::RateLimited {
            retry_after,
            message: message.into(),
        }
    }

    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::UnknownUpstreamError {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify an HTTP failure status
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthError { message },
            429 => Self::RateLimited {
                retry_after,
                message,
            },
            408 => Self::Timeout { message },
            500 | 502 | 503 | 504 | 529 => Self::UpstreamUnavailable { message },
            s if (400..500).contains(&s) => Self::InvalidRequest { message },
            _ => Self::UnknownUpstreamError { message },
        }
    }

    /// Whether the registry may retry the call
    ///
    /// Only rate limiting and timeouts are transient; auth and request
    /// errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }

    /// Retry-after hint if the upstream supplied one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Protocol-level error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthError { .. } => ErrorKind::AuthError,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UnknownUpstreamError { .. } => ErrorKind::UnknownUpstreamError,
            Self::Configuration { .. } => ErrorKind::ConfigurationError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let msg = || "boom".to_string();
        assert!(matches!(ProviderError::from_status(401, None, msg()), ProviderError::AuthError { .. }));
        assert!(matches!(ProviderError::from_status(403, None, msg()), ProviderError::AuthError { .. }));
        assert!(matches!(ProviderError::from_status(408, None, msg()), ProviderError::Timeout { .. }));
        assert!(matches!(ProviderError::from_status(422, None, msg()), ProviderError::InvalidRequest { .. }));
        assert!(matches!(ProviderError::from_status(529, None, msg()), ProviderError::UpstreamUnavailable { .. }));
        assert!(matches!(ProviderError::from_status(501, None, msg()), ProviderError::UnknownUpstreamError { .. }));

        let limited = ProviderError::from_status(429, Some(Duration::from_secs(7)), msg());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(ProviderError::rate_limited(None, "slow down").is_retryable());
        assert!(ProviderError::timeout("took too long").is_retryable());
        assert!(!ProviderError::auth("bad key").is_retryable());
        assert!(!ProviderError::invalid_request("bad model").is_retryable());
        assert!(!ProviderError::unavailable("503").is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn test_kind_mapping_preserves_specificity() {
        assert_eq!(ProviderError::auth("x").kind(), ErrorKind::AuthError);
        assert_eq!(ProviderError::configuration("x").kind(), ErrorKind::ConfigurationError);
        assert_eq!(ProviderError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
