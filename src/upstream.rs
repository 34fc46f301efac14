//! Shared plumbing for the two external services: failure taxonomy and HTTP helpers.

use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Retryability of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network trouble, timeouts, rate limiting or server-side faults.
    Transient,
    /// Rejected input, authentication, quota exhaustion or unusable responses.
    Permanent,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Underlying cause of an external call failure.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before a usable response was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status code.
    #[error("Unexpected response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The service embedded an error in an otherwise successful response.
    #[error("Service reported {status} ({code}): {message}")]
    Provider {
        /// Numeric RPC status code.
        code: i64,
        /// Symbolic RPC status, when supplied.
        status: String,
        /// Provider diagnostic message.
        message: String,
    },
    /// The attempt exceeded its per-call budget and was cancelled.
    #[error("Call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The response could not be decoded into the expected shape.
    #[error("Malformed service response: {0}")]
    InvalidResponse(String),
    /// The generative service refused to produce output for the prompt.
    #[error("Response blocked by the service: {0}")]
    Blocked(String),
}

impl UpstreamError {
    /// Sort the failure into retryable and terminal buckets.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Http(error) => {
                if error.is_decode() || error.is_builder() {
                    FailureClass::Permanent
                } else {
                    FailureClass::Transient
                }
            }
            Self::UnexpectedStatus { status, body } => classify_status(*status, body),
            Self::Provider {
                code,
                status,
                message,
            } => classify_rpc(*code, status, message),
            Self::Timeout(_) => FailureClass::Transient,
            Self::InvalidUrl(_) | Self::InvalidResponse(_) | Self::Blocked(_) => {
                FailureClass::Permanent
            }
        }
    }
}

/// Classify an HTTP status returned by a service.
///
/// 408, 429 and 5xx are transient unless the body reports quota exhaustion; every other
/// non-success status is permanent.
pub fn classify_status(status: StatusCode, body: &str) -> FailureClass {
    if mentions_quota(body) {
        return FailureClass::Permanent;
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

/// Classify a google.rpc status embedded in a response payload.
pub fn classify_rpc(code: i64, status: &str, message: &str) -> FailureClass {
    // ABORTED, DEADLINE_EXCEEDED, INTERNAL, UNAVAILABLE
    const TRANSIENT_CODES: [i64; 4] = [10, 4, 13, 14];
    const RESOURCE_EXHAUSTED: i64 = 8;

    if code == RESOURCE_EXHAUSTED || status == "RESOURCE_EXHAUSTED" {
        return if mentions_quota(message) {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        };
    }
    if TRANSIENT_CODES.contains(&code)
        || matches!(
            status,
            "ABORTED" | "DEADLINE_EXCEEDED" | "INTERNAL" | "UNAVAILABLE"
        )
    {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

fn mentions_quota(text: &str) -> bool {
    text.to_ascii_lowercase().contains("quota")
}

/// Turn a non-success response into an [`UpstreamError::UnexpectedStatus`].
pub(crate) async fn status_error(response: reqwest::Response) -> UpstreamError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    UpstreamError::UnexpectedStatus { status, body }
}

/// Google-style error envelope: `{"error": {"code", "message", "status"}}`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RpcStatus {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

impl RpcStatus {
    pub(crate) fn into_error(self) -> UpstreamError {
        UpstreamError::Provider {
            code: self.code,
            status: if self.status.is_empty() {
                "UNKNOWN".into()
            } else {
                self.status
            },
            message: self.message,
        }
    }
}

pub(crate) fn normalize_base_url(url: &str) -> Result<String, UpstreamError> {
    let mut parsed =
        reqwest::Url::parse(url).map_err(|err| UpstreamError::InvalidUrl(err.to_string()))?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

pub(crate) fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Header carrying the API key for both Google services.
pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";

pub(crate) fn with_api_key(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) if !key.is_empty() => request.header(API_KEY_HEADER, key),
        _ => request,
    }
}
