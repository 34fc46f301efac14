//! HTTP surface for Visiongate.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /extract` – Multipart upload (`file` part plus optional `schema` text part). Runs the
//!   upload through validation, OCR and structured extraction and answers with the combined
//!   result, a `partial` result when only OCR succeeded, or a failure with a stable `error_code`.
//! - `GET /schemas` – List the extraction schema variants and the default one.
//! - `GET /metrics` – Observe request outcome counters.
//! - `GET /health` – Liveness probe.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::gateway::{GatewayApi, GatewayFailure};
use crate::inference::ExtractionSchema;
use crate::metrics::MetricsSnapshot;
use crate::response::assemble;
use crate::validation::{RejectionReason, UploadPayload};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Room left for multipart boundaries, part headers and the `schema` field.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the HTTP router exposing the extraction API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: GatewayApi + 'static,
{
    let body_limit = service
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/extract",
            post(extract_document::<S>).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/schemas", get(list_schemas::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .route("/commands", get(get_commands))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Upload parts pulled out of the multipart body.
#[derive(Default)]
struct ExtractForm {
    file: Option<(Bytes, Option<String>, Option<String>)>,
    schema: Option<String>,
}

/// Run an uploaded document through the extraction pipeline.
///
/// The file is taken from the `file` part, or from the first part carrying a filename when no
/// part is named `file`. Body-limit overflows are reported as `PAYLOAD_TOO_LARGE` in the same
/// JSON contract as every other failure.
async fn extract_document<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response
where
    S: GatewayApi,
{
    let result = match multipart {
        Err(rejection) => {
            tracing::info!(error = %rejection.body_text(), "Rejected non-multipart request");
            service.reject(GatewayFailure::InvalidRequest(rejection.body_text()))
        }
        Ok(multipart) => match read_form(multipart).await {
            Err(err) => {
                tracing::info!(
                    status = %err.status(),
                    error = %err.body_text(),
                    "Failed to read upload"
                );
                service.reject(form_failure(&err, service.max_upload_bytes()))
            }
            Ok(ExtractForm { file: None, .. }) => {
                tracing::info!("Upload carried no file part");
                service.reject(GatewayFailure::Rejected(RejectionReason::EmptyPayload))
            }
            Ok(ExtractForm {
                file: Some((bytes, content_type, filename)),
                schema,
            }) => {
                let payload = UploadPayload::new(bytes, content_type, filename);
                service.extract(payload, schema).await
            }
        },
    };

    let (status, body) = assemble(&result);
    (status, Json(body)).into_response()
}

async fn read_form(mut multipart: Multipart) -> Result<ExtractForm, MultipartError> {
    let mut form = ExtractForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "schema" => {
                form.schema = Some(field.text().await?);
            }
            _ if name == "file" || field.file_name().is_some() => {
                if form.file.is_some() {
                    tracing::warn!(field = %name, "Ignoring additional file part");
                    continue;
                }
                let content_type = field.content_type().map(str::to_string);
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                form.file = Some((bytes, content_type, filename));
            }
            _ => {
                tracing::debug!(field = %name, "Ignoring unknown form part");
            }
        }
    }
    Ok(form)
}

fn form_failure(err: &MultipartError, max_bytes: usize) -> GatewayFailure {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayFailure::Rejected(RejectionReason::PayloadTooLarge {
            size: max_bytes.saturating_add(1),
            max: max_bytes,
        })
    } else {
        GatewayFailure::InvalidRequest(err.body_text())
    }
}

/// Response body for `GET /schemas`.
#[derive(Serialize)]
struct SchemasResponse {
    default: String,
    schemas: Vec<ExtractionSchema>,
}

/// List the configured extraction schema variants.
async fn list_schemas<S>(State(service): State<Arc<S>>) -> Json<SchemasResponse>
where
    S: GatewayApi,
{
    Json(SchemasResponse {
        default: service.default_schema().to_string(),
        schemas: service
            .schemas()
            .iter()
            .map(|schema| schema.as_ref().clone())
            .collect(),
    })
}

/// Return request outcome counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: GatewayApi,
{
    Json(service.metrics_snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "extract",
                method: "POST",
                path: "/extract",
                description: "Upload an image or PDF as multipart/form-data (`file`, optional `schema`). Returns OCR blocks, labels and the extracted schema fields; `status` is `success`, `partial` (OCR only, see `degraded_reason`) or `failure` with an `error_code`.",
                request_example: Some(json!({
                    "file": "@receipt.jpg;type=image/jpeg",
                    "schema": "document"
                })),
            },
            CommandDescriptor {
                name: "schemas",
                method: "GET",
                path: "/schemas",
                description: "List extraction schema variants with their fields and the default variant.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return request outcome counters (requests, succeeded, partial, failed, rejected).",
                request_example: None,
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Liveness probe.",
                request_example: None,
            },
        ],
    })
}
