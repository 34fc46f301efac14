//! Request state machine: validate, extract text, infer, assemble.

use crate::config::Config;
use crate::gateway::GatewayApi;
use crate::gateway::types::{DegradedReason, GatewayFailure, GatewayResult, PipelineState};
use crate::inference::{
    ExtractionSchema, GeminiBackend, SchemaError, SchemaRegistry, StructuredInference,
};
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::upstream::{FailureClass, UpstreamError};
use crate::validation::{UploadPayload, UploadValidator};
use crate::vision::{GoogleVisionBackend, VisionExtractor};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::Instrument;
use uuid::Uuid;

/// Errors raised while wiring the orchestrator at start-up.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Schema registry could not be loaded.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// An HTTP client could not be constructed.
    #[error(transparent)]
    Client(#[from] UpstreamError),
}

/// Sequences the pipeline stages for each request.
///
/// Holds only immutable handles and atomic counters, so one instance serves every request
/// concurrently behind an `Arc`.
pub struct Orchestrator {
    validator: UploadValidator,
    vision: VisionExtractor,
    inference: StructuredInference,
    schemas: SchemaRegistry,
    metrics: Arc<GatewayMetrics>,
    request_deadline: Duration,
}

impl Orchestrator {
    /// Wire the orchestrator from already constructed stages.
    pub fn new(
        validator: UploadValidator,
        vision: VisionExtractor,
        inference: StructuredInference,
        schemas: SchemaRegistry,
        request_deadline: Duration,
    ) -> Self {
        Self {
            validator,
            vision,
            inference,
            schemas,
            metrics: Arc::new(GatewayMetrics::new()),
            request_deadline,
        }
    }

    /// Build the HTTP-backed pipeline described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let schemas =
            SchemaRegistry::load(config.schemas_file.as_deref(), &config.default_schema)?;
        let vision_backend =
            GoogleVisionBackend::new(&config.vision_api_url, config.vision_api_key.clone())?;
        let inference_backend = GeminiBackend::new(
            &config.inference_api_url,
            config.inference_api_key.clone(),
            config.inference_model.clone(),
            config.generation.clone(),
        )?;
        tracing::info!(
            schemas = schemas.list().len(),
            default_schema = schemas.default_name(),
            deadline_ms = config.request_deadline().as_millis() as u64,
            "Extraction pipeline ready"
        );

        Ok(Self::new(
            UploadValidator::new(config.max_upload_bytes, config.allowed_content_types.clone()),
            VisionExtractor::new(Arc::new(vision_backend), config.retry),
            StructuredInference::new(Arc::new(inference_backend), config.retry)
                .with_upload_attachment(config.attach_upload),
            schemas,
            config.request_deadline(),
        ))
    }

    /// Run one upload through the pipeline.
    pub async fn process(&self, payload: UploadPayload, schema: Option<&str>) -> GatewayResult {
        self.metrics.record_request();
        let span = tracing::info_span!(
            "extract",
            request_id = %Uuid::new_v4(),
            sha256 = tracing::field::Empty,
            bytes = payload.bytes.len(),
        );
        let result = self.run(payload, schema).instrument(span).await;
        self.metrics.record_outcome(result.outcome());
        result
    }

    async fn run(&self, payload: UploadPayload, schema: Option<&str>) -> GatewayResult {
        let deadline = Instant::now() + self.request_deadline;
        let mut state = PipelineState::Received;

        advance(&mut state, PipelineState::Validating);
        let schema = match self.schemas.resolve(schema) {
            Ok(schema) => schema,
            Err(err) => {
                tracing::info!(error = %err, "Rejected request");
                let name = schema.unwrap_or_default().trim().to_string();
                let failure = GatewayFailure::InvalidSchema(name);
                return finish(&mut state, GatewayResult::Failure(failure));
            }
        };
        let upload = match self.validator.validate(payload) {
            Ok(upload) => upload,
            Err(reason) => {
                tracing::info!(reason = %reason, "Rejected upload");
                let failure = GatewayFailure::Rejected(reason);
                return finish(&mut state, GatewayResult::Failure(failure));
            }
        };
        let fingerprint = fingerprint(upload.bytes().clone()).await;
        tracing::Span::current().record("sha256", fingerprint.as_str());
        tracing::debug!(
            content_type = upload.content_type(),
            filename = upload.filename().unwrap_or("-"),
            schema = %schema.name,
            "Upload accepted"
        );

        advance(&mut state, PipelineState::ExtractingText);
        let vision = match timeout_at(deadline, self.vision.extract(&upload)).await {
            Ok(Ok(vision)) => vision,
            Ok(Err(err)) => {
                tracing::error!(class = %err.class, error = %err, "Vision stage failed");
                return finish(
                    &mut state,
                    GatewayResult::Failure(GatewayFailure::VisionUnavailable { class: err.class }),
                );
            }
            Err(_) => {
                tracing::error!("Request deadline expired during vision stage");
                return finish(
                    &mut state,
                    GatewayResult::Failure(GatewayFailure::VisionUnavailable {
                        class: FailureClass::Transient,
                    }),
                );
            }
        };

        advance(&mut state, PipelineState::Inferring);
        let text_context = vision.joined_text();
        let inferring = self.inference.infer(&text_context, &schema, Some(&upload));
        let inferred = timeout_at(deadline, inferring).await;

        advance(&mut state, PipelineState::Assembling);
        let result = match inferred {
            Ok(Ok(inference)) => GatewayResult::Success {
                schema: schema.name.clone(),
                vision,
                inference,
            },
            Ok(Err(err)) => {
                tracing::warn!(
                    class = %err.class,
                    error = %err,
                    "Inference stage failed; degrading"
                );
                GatewayResult::Partial {
                    schema: schema.name.clone(),
                    vision,
                    reason: DegradedReason::InferenceFailed { class: err.class },
                }
            }
            Err(_) => {
                tracing::warn!("Request deadline expired during inference stage; degrading");
                GatewayResult::Partial {
                    schema: schema.name.clone(),
                    vision,
                    reason: DegradedReason::DeadlineExceeded,
                }
            }
        };
        finish(&mut state, result)
    }
}

/// SHA-256 of an accepted upload, computed off the async workers.
async fn fingerprint(bytes: Bytes) -> String {
    tokio::task::spawn_blocking(move || hex::encode(Sha256::digest(&bytes)))
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Fingerprint task failed");
            String::from("-")
        })
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    tracing::debug!(from = %state, to = %next, "Pipeline transition");
    *state = next;
}

fn finish(state: &mut PipelineState, result: GatewayResult) -> GatewayResult {
    advance(state, PipelineState::Done(result.outcome()));
    tracing::info!(status = result.status_label(), "Extraction request finished");
    result
}

#[async_trait]
impl GatewayApi for Orchestrator {
    async fn extract(&self, payload: UploadPayload, schema: Option<String>) -> GatewayResult {
        self.process(payload, schema.as_deref()).await
    }

    fn reject(&self, failure: GatewayFailure) -> GatewayResult {
        self.metrics.record_request();
        let result = GatewayResult::Failure(failure);
        self.metrics.record_outcome(result.outcome());
        result
    }

    fn max_upload_bytes(&self) -> usize {
        self.validator.max_bytes()
    }

    fn schemas(&self) -> Vec<Arc<ExtractionSchema>> {
        self.schemas.list()
    }

    fn default_schema(&self) -> &str {
        self.schemas.default_name()
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
