//! Error types for slidesmith-ai

use thiserror::Error;

/// Result type alias using slidesmith-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the model endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Request was aborted
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and body into an error
    pub fn from_status(status: reqwest::StatusCode, body: String, retry_after: Option<u64>) -> Self {
        match status.as_u16() {
            401 | 403 => Error::InvalidApiKey,
            429 => Error::RateLimited { retry_after },
            code => Error::api(code, extract_error_message(&body)),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Api { status, message } => {
                let msg = message.to_lowercase();
                *status >= 500 || msg.contains("overloaded") || msg.contains("rate limit")
            }
            _ => false,
        }
    }
}

/// Pull `error.message` out of an OpenAI-style error body, falling back to the raw text
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_retryable_server_errors() {
        assert!(Error::api(503, "service unavailable").is_retryable());
        assert!(Error::api(400, "The engine is overloaded").is_retryable());
    }

    #[test]
    fn test_not_retryable_client_errors() {
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::Aborted.is_retryable());
    }

    #[test]
    fn test_from_status_maps_auth_and_rate_limit() {
        let e = Error::from_status(reqwest::StatusCode::UNAUTHORIZED, String::new(), None);
        assert!(matches!(e, Error::InvalidApiKey));

        let e = Error::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new(), Some(3));
        assert!(matches!(e, Error::RateLimited { retry_after: Some(3) }));
    }

    #[test]
    fn test_from_status_extracts_openai_error_message() {
        let body = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        let e = Error::from_status(reqwest::StatusCode::NOT_FOUND, body.into(), None);
        match e {
            Error::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "model not found");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_status_keeps_raw_body_when_not_json() {
        let e = Error::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream down".into(), None);
        assert_eq!(e.to_string(), "API error (502): upstream down");
    }
}
