//! Prompt assembly for structured extraction.
//!
//! The prompt is deterministic for a given schema and text so identical submissions produce
//! identical requests.

use crate::inference::schema::ExtractionSchema;
use serde_json::Value;

/// Key the model may use to report its confidence.
pub const CONFIDENCE_KEY: &str = "_confidence";
/// Key the model may use to explain its answer.
pub const EXPLANATION_KEY: &str = "_explanation";

/// Fixed instructions placed before the schema-specific part.
pub const EXTRACTION_PREAMBLE: &str = r#"You extract structured data from documents that were read by an OCR engine.

Rules:
1. Use only information present in the document text. Never invent values.
2. When a field cannot be found, set it to null.
3. Keep the original spelling of names, numbers and dates unless the field description asks otherwise.
4. OCR text may contain recognition errors; correct them only when you are certain.
5. Answer with a single JSON object and nothing else."#;

/// Render the full prompt for `schema` over `text_context`.
pub fn build_extraction_prompt(schema: &ExtractionSchema, text_context: &str) -> String {
    let mut prompt = String::from(EXTRACTION_PREAMBLE);

    if !schema.description.trim().is_empty() {
        prompt.push_str("\n\nDocument kind: ");
        prompt.push_str(schema.description.trim());
    }
    if let Some(instructions) = schema
        .instructions
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        prompt.push_str("\n\nAdditional instructions:\n");
        prompt.push_str(instructions);
    }

    prompt.push_str("\n\nFields:\n");
    for field in &schema.fields {
        prompt.push_str(&format!("- {} ({})", field.name, field.kind.as_str()));
        if !field.description.trim().is_empty() {
            prompt.push_str(": ");
            prompt.push_str(field.description.trim());
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\nAlso include \"{CONFIDENCE_KEY}\" (a number between 0 and 1) and \"{EXPLANATION_KEY}\" (one short sentence).\n"
    ));
    prompt.push_str("\nJSON output shape:\n");
    prompt.push_str(&response_shape(schema));

    prompt.push_str("\n\nDocument text:\n\"\"\"\n");
    if text_context.trim().is_empty() {
        prompt.push_str("(no text was detected in the document)");
    } else {
        prompt.push_str(text_context);
    }
    prompt.push_str("\n\"\"\"");
    prompt
}

fn response_shape(schema: &ExtractionSchema) -> String {
    // Field order follows the schema so the rendered shape is stable.
    let mut lines = Vec::with_capacity(schema.fields.len() + 2);
    for field in &schema.fields {
        let key = Value::String(field.name.clone());
        lines.push(format!("  {key}: <{} or null>", field.kind.as_str()));
    }
    lines.push(format!("  \"{CONFIDENCE_KEY}\": 0.0"));
    lines.push(format!("  \"{EXPLANATION_KEY}\": \"...\""));
    format!("{{\n{}\n}}", lines.join(",\n"))
}
