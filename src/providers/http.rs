//! Shared HTTP exchange for the network-backed adapters
//!
//! One POST per call, raced against the caller's cancellation token and the
//! per-call timeout. Failures come back raw so that each adapter can
//! classify them against its own error body shape.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::RequestBuilder;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Unclassified outcome of a failed exchange
#[derive(Debug)]
pub(crate) enum UpstreamFailure {
    /// Non-success HTTP status
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    /// The per-call timeout elapsed
    TimedOut,
    /// Connection could not be established
    Unreachable(String),
    /// Other transport failure
    Transport(String),
    /// Success status but the body was not JSON
    Decode(String),
    /// Caller cancelled before a usable response arrived
    Cancelled,
}

/// Send `request` and decode the JSON body
pub(crate) async fn send_json(
    request: RequestBuilder,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Value, UpstreamFailure> {
    if cancel.is_cancelled() {
        return Err(UpstreamFailure::Cancelled);
    }

    let exchange = async move {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamFailure::Status {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamFailure::TimedOut
            } else {
                UpstreamFailure::Decode(e.to_string())
            }
        })
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Upstream call aborted by cancellation");
            return Err(UpstreamFailure::Cancelled);
        }
        outcome = tokio::time::timeout(timeout, exchange) => outcome,
    };

    // A response that raced with cancellation is discarded
    if cancel.is_cancelled() {
        return Err(UpstreamFailure::Cancelled);
    }

    outcome.unwrap_or(Err(UpstreamFailure::TimedOut))
}

fn transport_failure(error: reqwest::Error) -> UpstreamFailure {
    if error.is_timeout() {
        UpstreamFailure::TimedOut
    } else if error.is_connect() {
        UpstreamFailure::Unreachable(error.to_string())
    } else {
        UpstreamFailure::Transport(error.to_string())
    }
}

/// Parse a `Retry-After` header given in (possibly fractional) seconds
///
/// HTTP-date values are ignored; the registry falls back to its own backoff.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds: f64 = raw.parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// Best-effort error message from an OpenAI-style body `{"error": {"message": ..}}`
pub(crate) fn openai_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("message"))
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| truncate(body))
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.is_empty() {
        return "empty response body".to_string();
    }
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("0.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(500)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_openai_error_message_extraction() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(openai_error_message(body), "Incorrect API key provided");
        assert_eq!(openai_error_message("plain text failure"), "plain text failure");
        assert_eq!(openai_error_message(""), "empty response body");
    }
}
