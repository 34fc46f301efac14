//! Structured extraction output and the inference stage error type.

use crate::retry::Classify;
use bytes::Bytes;
use crate::upstream::{FailureClass, UpstreamError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Request handed to an inference backend.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Name of the schema variant being filled.
    pub schema_name: String,
    /// Text produced by the vision stage.
    pub text_context: String,
    /// Fully rendered prompt.
    pub prompt: String,
    /// Original document, sent alongside the prompt when attachments are enabled.
    pub attachment: Option<Attachment>,
}

/// Inline document data for the generative service.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Media type of `data`.
    pub mime_type: String,
    /// Raw document bytes.
    pub data: Bytes,
}

/// Schema-complete extraction result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferenceResult {
    /// One entry per declared schema field; `null` when nothing was found.
    pub fields: BTreeMap<String, Value>,
    /// Model self-reported confidence in `[0, 1]`, when supplied.
    pub confidence: Option<f64>,
    /// Model explanation, when supplied.
    pub explanation: Option<String>,
}

impl InferenceResult {
    /// Whether every field came back empty.
    pub fn is_all_null(&self) -> bool {
        self.fields.values().all(Value::is_null)
    }
}

/// Failure of the inference stage after classification.
#[derive(Debug, Error)]
#[error("{class} inference service failure: {source}")]
pub struct InferenceServiceError {
    /// Whether the failure was retryable.
    pub class: FailureClass,
    /// Underlying cause; never exposed to HTTP callers.
    #[source]
    pub source: UpstreamError,
}

impl From<UpstreamError> for InferenceServiceError {
    fn from(source: UpstreamError) -> Self {
        Self {
            class: source.class(),
            source,
        }
    }
}

impl Classify for InferenceServiceError {
    fn class(&self) -> FailureClass {
        self.class
    }

    fn timed_out(after: Duration) -> Self {
        UpstreamError::Timeout(after).into()
    }
}
