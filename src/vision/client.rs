//! HTTP client for the Google Cloud Vision annotate endpoints.

use crate::upstream::{
    RpcStatus, UpstreamError, format_endpoint, normalize_base_url, status_error, with_api_key,
};
use crate::validation::ValidatedUpload;
use crate::vision::VisionBackend;
use crate::vision::types::{BoundingBox, Label, TextBlock, Vertex, VisionResult};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashSet;

const MAX_LABELS: u32 = 10;

/// Vision backend issuing `images:annotate` / `files:annotate` requests.
pub struct GoogleVisionBackend {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl GoogleVisionBackend {
    /// Construct a client for the given endpoint and credential.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, UpstreamError> {
        let client = Client::builder().user_agent("visiongate/0.1").build()?;
        let base_url = normalize_base_url(base_url)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized vision HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let request = self
            .client
            .post(format_endpoint(&self.base_url, path))
            .json(body);
        let response = with_api_key(request, self.api_key.as_deref()).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let error = status_error(response).await;
            tracing::debug!(path, error = %error, "Vision request failed");
            Err(error)
        }
    }

    async fn annotate_image(&self, content: String) -> Result<VisionResult, UpstreamError> {
        let body = json!({
            "requests": [{
                "image": { "content": content },
                "features": features(),
            }]
        });
        let response = self.post("images:annotate", &body).await?;
        let payload: BatchAnnotateImagesResponse = decode(response).await?;
        let pages = payload
            .responses
            .into_iter()
            .map(|page| (None, page))
            .collect();
        normalize_pages(pages)
    }

    async fn annotate_file(
        &self,
        content: String,
        mime_type: &str,
    ) -> Result<VisionResult, UpstreamError> {
        let body = json!({
            "requests": [{
                "inputConfig": { "content": content, "mimeType": mime_type },
                "features": features(),
            }]
        });
        let response = self.post("files:annotate", &body).await?;
        let payload: BatchAnnotateFilesResponse = decode(response).await?;

        let mut pages = Vec::new();
        for file in payload.responses {
            if let Some(error) = file.error.filter(|status| status.code != 0) {
                return Err(error.into_error());
            }
            for (index, page) in file.responses.into_iter().enumerate() {
                let number = page
                    .context
                    .as_ref()
                    .and_then(|context| context.page_number)
                    .unwrap_or(index as u32 + 1);
                pages.push((Some(number), page));
            }
        }
        normalize_pages(pages)
    }
}

#[async_trait]
impl VisionBackend for GoogleVisionBackend {
    async fn annotate(&self, upload: &ValidatedUpload) -> Result<VisionResult, UpstreamError> {
        let content = BASE64_STANDARD.encode(upload.bytes());
        if upload.is_pdf() {
            self.annotate_file(content, upload.content_type()).await
        } else {
            self.annotate_image(content).await
        }
    }
}

fn features() -> Value {
    json!([
        { "type": "DOCUMENT_TEXT_DETECTION" },
        { "type": "LABEL_DETECTION", "maxResults": MAX_LABELS },
    ])
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, UpstreamError> {
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|err| UpstreamError::InvalidResponse(format!("vision payload: {err}")))
}

/// Fold per-page provider responses into one ordered result.
fn normalize_pages(
    pages: Vec<(Option<u32>, AnnotateImageResponse)>,
) -> Result<VisionResult, UpstreamError> {
    let mut result = VisionResult::default();
    let mut seen_labels = HashSet::new();

    for (page_number, page) in pages {
        if let Some(error) = page.error.filter(|status| status.code != 0) {
            return Err(error.into_error());
        }

        let blocks = page
            .full_text_annotation
            .map(|annotation| full_text_blocks(annotation, page_number))
            .unwrap_or_default();
        if blocks.is_empty() {
            // Plain TEXT_DETECTION shape: first entry carries the whole text.
            if let Some(first) = page.text_annotations.into_iter().next() {
                let text = first.description.trim().to_string();
                if !text.is_empty() {
                    result.blocks.push(TextBlock {
                        text,
                        confidence: first.confidence,
                        bounding_box: first.bounding_poly.and_then(BoundingPoly::into_box),
                        page: page_number,
                    });
                }
            }
        } else {
            result.blocks.extend(blocks);
        }

        for label in page.label_annotations {
            let description = label.description.trim().to_string();
            if !description.is_empty() && seen_labels.insert(description.to_lowercase()) {
                result.labels.push(Label {
                    description,
                    score: label.score,
                });
            }
        }
    }

    Ok(result)
}

fn full_text_blocks(annotation: FullTextAnnotation, page_number: Option<u32>) -> Vec<TextBlock> {
    let mut blocks = Vec::new();
    for page in annotation.pages {
        for block in page.blocks {
            let text = block_text(&block);
            if text.is_empty() {
                continue;
            }
            blocks.push(TextBlock {
                text,
                confidence: block.confidence,
                bounding_box: block.bounding_box.and_then(BoundingPoly::into_box),
                page: page_number,
            });
        }
    }
    blocks
}

fn block_text(block: &Block) -> String {
    let mut text = String::new();
    for paragraph in &block.paragraphs {
        for word in &paragraph.words {
            for symbol in &word.symbols {
                text.push_str(&symbol.text);
                let detected = symbol
                    .property
                    .as_ref()
                    .and_then(|property| property.detected_break.as_ref())
                    .map(|detected| detected.kind.as_str());
                match detected {
                    Some("SPACE" | "SURE_SPACE") => text.push(' '),
                    Some("EOL_SURE_SPACE" | "LINE_BREAK") => text.push('\n'),
                    Some("HYPHEN") => text.push_str("-\n"),
                    _ => {}
                }
            }
        }
    }
    text.trim().to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatchAnnotateImagesResponse {
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatchAnnotateFilesResponse {
    responses: Vec<AnnotateFileResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnnotateFileResponse {
    responses: Vec<AnnotateImageResponse>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnnotateImageResponse {
    text_annotations: Vec<EntityAnnotation>,
    full_text_annotation: Option<FullTextAnnotation>,
    label_annotations: Vec<EntityAnnotation>,
    context: Option<ImageContext>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ImageContext {
    page_number: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EntityAnnotation {
    description: String,
    score: Option<f32>,
    confidence: Option<f32>,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BoundingPoly {
    vertices: Vec<RawVertex>,
}

impl BoundingPoly {
    fn into_box(self) -> Option<BoundingBox> {
        if self.vertices.is_empty() {
            return None;
        }
        // Vision omits coordinates that are zero.
        let vertices = self
            .vertices
            .into_iter()
            .map(|vertex| Vertex {
                x: vertex.x.unwrap_or(0),
                y: vertex.y.unwrap_or(0),
            })
            .collect();
        Some(BoundingBox { vertices })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVertex {
    x: Option<i64>,
    y: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullTextAnnotation {
    pages: Vec<Page>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Page {
    blocks: Vec<Block>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Block {
    paragraphs: Vec<Paragraph>,
    bounding_box: Option<BoundingPoly>,
    confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Paragraph {
    words: Vec<Word>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Word {
    symbols: Vec<Symbol>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Symbol {
    text: String,
    property: Option<TextProperty>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TextProperty {
    detected_break: Option<DetectedBreak>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetectedBreak {
    #[serde(rename = "type")]
    kind: String,
}
