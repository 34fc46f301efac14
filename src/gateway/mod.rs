//! Orchestration of the extraction pipeline and the seam used by the HTTP layer.

mod orchestrator;
pub mod types;

use crate::inference::ExtractionSchema;
use crate::metrics::MetricsSnapshot;
use crate::validation::UploadPayload;
use async_trait::async_trait;
use std::sync::Arc;

pub use orchestrator::{BuildError, Orchestrator};
pub use types::{DegradedReason, GatewayFailure, GatewayResult, PipelineState};

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Validate, extract and infer for one upload.
    async fn extract(&self, payload: UploadPayload, schema: Option<String>) -> GatewayResult;

    /// Record a request refused before it reached the pipeline.
    fn reject(&self, failure: GatewayFailure) -> GatewayResult;

    /// Largest accepted upload, used to size the request body limit.
    fn max_upload_bytes(&self) -> usize;

    /// Configured schema variants.
    fn schemas(&self) -> Vec<Arc<ExtractionSchema>>;

    /// Variant used when a request does not name one.
    fn default_schema(&self) -> &str;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}
