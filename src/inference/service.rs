use crate::inference::prompt::{CONFIDENCE_KEY, EXPLANATION_KEY, build_extraction_prompt};
use crate::inference::schema::{ExtractionSchema, FieldKind};
use crate::inference::types::{
    Attachment, InferenceRequest, InferenceResult, InferenceServiceError,
};
use crate::inference::InferenceBackend;
use crate::retry::RetryPolicy;
use crate::validation::ValidatedUpload;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

static RE_GROUPED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("static grouping regex must compile")
});

/// Inference stage entry point: prompt assembly, retried provider calls and schema conformance.
#[derive(Clone)]
pub struct StructuredInference {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
    attach_upload: bool,
}

impl StructuredInference {
    /// Wrap a backend with the given retry discipline. Uploads are not attached.
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            attach_upload: false,
        }
    }

    /// Send the uploaded document to the model next to the OCR text.
    pub fn with_upload_attachment(mut self, attach: bool) -> Self {
        self.attach_upload = attach;
        self
    }

    /// Fill `schema` from `text_context`, optionally showing the model the upload itself.
    ///
    /// An empty context is still sent; the model is expected to answer with nulls.
    pub async fn infer(
        &self,
        text_context: &str,
        schema: &ExtractionSchema,
        upload: Option<&ValidatedUpload>,
    ) -> Result<InferenceResult, InferenceServiceError> {
        let attachment = upload
            .filter(|_| self.attach_upload)
            .map(|upload| Attachment {
                mime_type: upload.content_type().to_string(),
                data: upload.bytes().clone(),
            });
        let request = InferenceRequest {
            schema_name: schema.name.clone(),
            text_context: text_context.to_string(),
            prompt: build_extraction_prompt(schema, text_context),
            attachment,
        };

        let raw = self
            .policy
            .run("inference", |attempt| {
                let request = &request;
                async move {
                    tracing::debug!(
                        attempt,
                        schema = %request.schema_name,
                        context_chars = request.text_context.chars().count(),
                        attached = request.attachment.is_some(),
                        "Calling inference service"
                    );
                    self.backend
                        .generate(request)
                        .await
                        .map_err(InferenceServiceError::from)
                }
            })
            .await?;

        let result = conform_to_schema(raw, schema);
        tracing::debug!(
            schema = %schema.name,
            filled = result.fields.values().filter(|value| !value.is_null()).count(),
            declared = result.fields.len(),
            "Inference finished"
        );
        Ok(result)
    }
}

/// Shape raw model output into exactly the declared fields.
///
/// Undeclared keys are dropped, missing keys become `null`, and values are coerced to the
/// declared kind where that is unambiguous.
pub fn conform_to_schema(mut raw: Map<String, Value>, schema: &ExtractionSchema) -> InferenceResult {
    let confidence = raw.remove(CONFIDENCE_KEY).and_then(|value| {
        as_f64(&value)
            .filter(|score| score.is_finite())
            .map(|score| score.clamp(0.0, 1.0))
    });
    let explanation = raw.remove(EXPLANATION_KEY).and_then(|value| match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    });

    let mut fields = BTreeMap::new();
    for field in &schema.fields {
        let value = raw
            .remove(&field.name)
            .map(|value| coerce(value, field.kind))
            .unwrap_or(Value::Null);
        fields.insert(field.name.clone(), value);
    }

    if !raw.is_empty() {
        let dropped: Vec<&str> = raw.keys().map(String::as_str).collect();
        tracing::debug!(schema = %schema.name, ?dropped, "Dropped undeclared fields");
    }

    InferenceResult {
        fields,
        confidence,
        explanation,
    }
}

fn coerce(value: Value, kind: FieldKind) -> Value {
    if let Value::String(text) = &value
        && text.trim().is_empty()
    {
        return Value::Null;
    }
    if value.is_null() {
        return Value::Null;
    }

    match kind {
        FieldKind::String => match value {
            Value::String(text) => Value::String(text.trim().to_string()),
            Value::Number(_) | Value::Bool(_) => Value::String(value.to_string()),
            _ => Value::Null,
        },
        FieldKind::Number => as_f64(&value)
            .and_then(|number| match value {
                Value::Number(original) => Some(Value::Number(original)),
                _ => Number::from_f64(number).map(Value::Number),
            })
            .unwrap_or(Value::Null),
        FieldKind::Integer => as_f64(&value)
            .filter(|number| number.fract() == 0.0 && number.abs() < i64::MAX as f64)
            .map(|number| Value::from(number as i64))
            .unwrap_or(Value::Null),
        FieldKind::Boolean => match value {
            Value::Bool(flag) => Value::Bool(flag),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Value::Bool(true),
                "false" | "no" => Value::Bool(false),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        FieldKind::Array => match value {
            Value::Array(items) => Value::Array(items),
            Value::Object(_) => Value::Null,
            scalar => Value::Array(vec![scalar]),
        },
        FieldKind::Object => match value {
            Value::Object(map) => Value::Object(map),
            _ => Value::Null,
        },
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let text = text.trim();
            if !text.contains(',') {
                text.parse().ok()
            } else if RE_GROUPED_NUMBER.is_match(text) {
                text.replace(',', "").parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}
