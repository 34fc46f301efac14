//! HTTP client for the Gemini `generateContent` endpoint.

use crate::config::GenerationSettings;
use crate::inference::InferenceBackend;
use crate::inference::types::{Attachment, InferenceRequest};
use crate::upstream::{UpstreamError, format_endpoint, normalize_base_url, status_error, with_api_key};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

/// Harm categories that receive the configured block threshold.
pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Inference backend that asks a Gemini model for a JSON object.
pub struct GeminiBackend {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) generation: GenerationSettings,
}

impl GeminiBackend {
    /// Construct a client for `model` at the given endpoint.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        generation: GenerationSettings,
    ) -> Result<Self, UpstreamError> {
        let client = Client::builder().user_agent("visiongate/0.1").build()?;
        let base_url = normalize_base_url(base_url)?;
        let model = model.into();
        tracing::debug!(
            url = %base_url,
            model = %model,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized inference HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            generation,
        })
    }

    fn request_body(&self, request: &InferenceRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(Attachment { mime_type, data }) = &request.attachment {
            parts.push(json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": BASE64_STANDARD.encode(data),
                }
            }));
        }
        let safety_settings: Vec<Value> = HARM_CATEGORIES
            .iter()
            .map(|category| {
                json!({
                    "category": category,
                    "threshold": self.generation.safety_threshold,
                })
            })
            .collect();

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "temperature": self.generation.temperature,
                "topP": self.generation.top_p,
                "maxOutputTokens": self.generation.max_output_tokens,
                "responseMimeType": "application/json",
            },
            "safetySettings": safety_settings,
        })
    }
}

#[async_trait]
impl InferenceBackend for GeminiBackend {
    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<Map<String, Value>, UpstreamError> {
        let path = format!("models/{}:generateContent", self.model);
        let http = self
            .client
            .post(format_endpoint(&self.base_url, &path))
            .json(&self.request_body(request));
        let response = with_api_key(http, self.api_key.as_deref()).send().await?;
        if !response.status().is_success() {
            let error = status_error(response).await;
            tracing::debug!(
                model = %self.model,
                schema = %request.schema_name,
                error = %error,
                "Inference request failed"
            );
            return Err(error);
        }

        let body = response.text().await?;
        let payload: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|err| UpstreamError::InvalidResponse(format!("inference payload: {err}")))?;
        let text = candidate_text(payload)?;
        parse_model_output(&text)
    }
}

fn candidate_text(payload: GenerateContentResponse) -> Result<String, UpstreamError> {
    if let Some(reason) = payload
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(UpstreamError::Blocked(reason));
    }
    let Some(candidate) = payload.candidates.into_iter().next() else {
        return Err(UpstreamError::Blocked("no candidates returned".into()));
    };

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    if text.trim().is_empty() {
        let reason = candidate
            .finish_reason
            .unwrap_or_else(|| "empty candidate".into());
        return Err(match reason.as_str() {
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
                UpstreamError::Blocked(reason)
            }
            _ => UpstreamError::InvalidResponse(format!("model returned no text ({reason})")),
        });
    }
    Ok(text)
}

static RE_CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static fence regex must compile")
});

/// Decode the model text into a JSON object, tolerating a Markdown code fence.
pub(crate) fn parse_model_output(text: &str) -> Result<Map<String, Value>, UpstreamError> {
    let candidate = RE_CODE_FENCE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|inner| inner.as_str())
        .unwrap_or_else(|| text.trim());

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(UpstreamError::InvalidResponse(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
        Err(err) => Err(UpstreamError::InvalidResponse(format!(
            "model output is not JSON: {err}"
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
