//! Inference stage: schema-guided structured extraction from OCR text.

pub mod client;
pub mod prompt;
pub mod schema;
mod service;
pub mod types;

use crate::upstream::UpstreamError;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use client::{GeminiBackend, HARM_CATEGORIES};
pub use schema::{
    DEFAULT_SCHEMA_NAME, ExtractionSchema, FieldKind, SchemaError, SchemaField, SchemaRegistry,
};
pub use service::{StructuredInference, conform_to_schema};
pub use types::{Attachment, InferenceRequest, InferenceResult, InferenceServiceError};

/// Single call to a generative model that returns a JSON object.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Produce the raw, not yet schema-conformed, object for `request`.
    async fn generate(&self, request: &InferenceRequest)
    -> Result<Map<String, Value>, UpstreamError>;
}
