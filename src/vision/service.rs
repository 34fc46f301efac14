use crate::retry::RetryPolicy;
use crate::validation::ValidatedUpload;
use crate::vision::{VisionBackend, VisionResult, VisionServiceError};
use std::sync::Arc;

/// Vision stage entry point: provider calls wrapped in the retry policy.
#[derive(Clone)]
pub struct VisionExtractor {
    backend: Arc<dyn VisionBackend>,
    policy: RetryPolicy,
}

impl VisionExtractor {
    /// Wrap a backend with the given retry discipline.
    pub fn new(backend: Arc<dyn VisionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Extract text blocks and labels, retrying transient failures.
    pub async fn extract(
        &self,
        upload: &ValidatedUpload,
    ) -> Result<VisionResult, VisionServiceError> {
        let result = self
            .policy
            .run("vision", |attempt| async move {
                tracing::debug!(
                    attempt,
                    content_type = upload.content_type(),
                    "Calling vision service"
                );
                self.backend
                    .annotate(upload)
                    .await
                    .map_err(VisionServiceError::from)
            })
            .await?;

        tracing::debug!(
            blocks = result.blocks.len(),
            labels = result.labels.len(),
            "Vision extraction finished"
        );
        Ok(result)
    }
}
