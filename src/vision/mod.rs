//! Vision stage: OCR and label detection on validated uploads.

pub mod client;
mod service;
pub mod types;

use crate::upstream::UpstreamError;
use crate::validation::ValidatedUpload;
use async_trait::async_trait;

pub use client::GoogleVisionBackend;
pub use service::VisionExtractor;
pub use types::{BoundingBox, Label, TextBlock, Vertex, VisionResult, VisionServiceError};

/// Single call to an OCR/vision provider, already normalized.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Detect text and labels in the upload.
    async fn annotate(&self, upload: &ValidatedUpload) -> Result<VisionResult, UpstreamError>;
}
