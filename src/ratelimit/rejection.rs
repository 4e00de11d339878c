//! Structured "too many requests" responses.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// The JSON error envelope shared with the rest of the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub timestamp: i64,
}

/// A rejection for a request denied by the limiter.
#[derive(Debug, Clone)]
pub struct Rejection {
    retry_after: Duration,
    timestamp_ms: i64,
}

impl Rejection {
    pub fn new(retry_after: Duration, timestamp_ms: i64) -> Self {
        Self {
            retry_after,
            timestamp_ms,
        }
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    /// Human-readable message with the retry delay in seconds.
    pub fn message(&self) -> String {
        format!(
            "Rate limit exceeded. Try again in {}s",
            self.retry_after.as_millis() as f64 / 1000.0
        )
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            error: self.message(),
            timestamp: self.timestamp_ms,
        }
    }

    /// Serialize the envelope, falling back to a hand-built body.
    ///
    /// A rejection must always be deliverable, so a serializer failure is
    /// logged and replaced rather than propagated.
    pub fn body(&self) -> String {
        let envelope = self.envelope();
        match serde_json::to_string(&envelope) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to serialize rate limit rejection, using fallback body");
                fallback_body(&envelope.error, envelope.timestamp)
            }
        }
    }

    /// `Retry-After` value: whole seconds, rounded up, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.retry_after.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Minimal JSON body built without a serializer.
pub fn fallback_body(message: &str, timestamp_ms: i64) -> String {
    let escaped = message.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "{{\"success\":false,\"error\":\"{}\",\"timestamp\":{}}}",
        escaped, timestamp_ms
    )
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body()));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs()));

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_carries_retry_seconds() {
        let rejection = Rejection::new(Duration::from_millis(500), 0);
        assert_eq!(rejection.message(), "Rate limit exceeded. Try again in 0.5s");

        let rejection = Rejection::new(Duration::from_millis(2_000), 0);
        assert_eq!(rejection.message(), "Rate limit exceeded. Try again in 2s");

        let rejection = Rejection::new(Duration::from_millis(1_234), 0);
        assert_eq!(rejection.message(), "Rate limit exceeded. Try again in 1.234s");
    }

    #[test]
    fn test_body_is_structured_envelope() {
        let rejection = Rejection::new(Duration::from_millis(2_000), 1_700_000_000_123);
        let value: serde_json::Value = serde_json::from_str(&rejection.body()).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Rate limit exceeded. Try again in 2s");
        assert_eq!(value["timestamp"], 1_700_000_000_123_i64);
    }

    #[test]
    fn test_fallback_body_is_valid_json() {
        let body = fallback_body(r#"say "hi" \ bye"#, 42);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"], r#"say "hi" \ bye"#);
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn test_retry_after_header_rounds_up() {
        assert_eq!(Rejection::new(Duration::from_millis(1), 0).retry_after_secs(), 1);
        assert_eq!(Rejection::new(Duration::from_millis(1_000), 0).retry_after_secs(), 1);
        assert_eq!(Rejection::new(Duration::from_millis(1_001), 0).retry_after_secs(), 2);
    }

    #[test]
    fn test_into_response() {
        let response = Rejection::new(Duration::from_millis(2_500), 0).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }
}
