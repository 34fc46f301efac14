//! Normalized OCR output and the vision stage error type.

use crate::retry::Classify;
use crate::upstream::{FailureClass, UpstreamError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Separator placed between blocks when they are handed to the inference stage.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Text and labels detected in an upload.
///
/// An empty result (no blocks, no labels) is a valid outcome and distinct from a failed call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisionResult {
    /// Text regions in the order the provider returned them.
    pub blocks: Vec<TextBlock>,
    /// Labels describing the image contents.
    pub labels: Vec<Label>,
}

impl VisionResult {
    /// Whether the provider found neither text nor labels.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.labels.is_empty()
    }

    /// Concatenate block texts in provider order, separated by a blank line.
    pub fn joined_text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }
}

/// One detected region of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    /// Raw text of the region.
    pub text: String,
    /// Provider confidence in `[0, 1]`, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Region outline, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// 1-based page number for multi-page documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Polygon outlining a text region, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    /// Polygon corners in provider order.
    pub vertices: Vec<Vertex>,
}

/// Polygon corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Vertex {
    /// Horizontal offset.
    pub x: i64,
    /// Vertical offset.
    pub y: i64,
}

/// Image-level label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    /// Human-readable label.
    pub description: String,
    /// Provider score in `[0, 1]`, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Failure of the vision stage after classification.
#[derive(Debug, Error)]
#[error("{class} vision service failure: {source}")]
pub struct VisionServiceError {
    /// Whether the failure was retryable.
    pub class: FailureClass,
    /// Underlying cause; never exposed to HTTP callers.
    #[source]
    pub source: UpstreamError,
}

impl From<UpstreamError> for VisionServiceError {
    fn from(source: UpstreamError) -> Self {
        Self {
            class: source.class(),
            source,
        }
    }
}

impl Classify for VisionServiceError {
    fn class(&self) -> FailureClass {
        self.class
    }

    fn timed_out(after: Duration) -> Self {
        UpstreamError::Timeout(after).into()
    }
}
