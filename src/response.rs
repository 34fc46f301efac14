//! Maps orchestrator results onto the HTTP contract.
//!
//! Every body carries an explicit `status`. Failures add a stable `error_code` and a message
//! written by the gateway; upstream error text never reaches the caller.

use crate::gateway::{GatewayFailure, GatewayResult};
use crate::upstream::FailureClass;
use crate::validation::RejectionReason;
use axum::http::StatusCode;
use serde_json::{Value, json};

/// Stable machine-readable failure codes.
pub mod codes {
    /// Upload contained no bytes or no file part.
    pub const EMPTY_PAYLOAD: &str = "EMPTY_PAYLOAD";
    /// Upload exceeded the size cap.
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
    /// Upload type is not accepted or does not match its contents.
    pub const UNSUPPORTED_MEDIA_TYPE: &str = "UNSUPPORTED_MEDIA_TYPE";
    /// Requested schema variant does not exist.
    pub const INVALID_SCHEMA: &str = "INVALID_SCHEMA";
    /// Request body was not a readable multipart form.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// Vision stage failed.
    pub const VISION_SERVICE_UNAVAILABLE: &str = "VISION_SERVICE_UNAVAILABLE";
}

/// Produce the status code and JSON body for `result`.
pub fn assemble(result: &GatewayResult) -> (StatusCode, Value) {
    match result {
        GatewayResult::Success {
            schema,
            vision,
            inference,
        } => (
            StatusCode::OK,
            json!({
                "status": result.status_label(),
                "schema": schema,
                "vision": vision,
                "inference": inference,
                "degraded": false,
                "degraded_reason": Value::Null,
            }),
        ),
        GatewayResult::Partial {
            schema,
            vision,
            reason,
        } => (
            StatusCode::OK,
            json!({
                "status": result.status_label(),
                "schema": schema,
                "vision": vision,
                "inference": Value::Null,
                "degraded": true,
                "degraded_reason": reason.to_string(),
            }),
        ),
        GatewayResult::Failure(failure) => {
            let (status, code, message) = describe_failure(failure);
            (
                status,
                json!({
                    "status": result.status_label(),
                    "error_code": code,
                    "message": message,
                }),
            )
        }
    }
}

fn describe_failure(failure: &GatewayFailure) -> (StatusCode, &'static str, String) {
    match failure {
        GatewayFailure::Rejected(RejectionReason::EmptyPayload) => (
            StatusCode::BAD_REQUEST,
            codes::EMPTY_PAYLOAD,
            "The upload is empty. Attach a non-empty file in the 'file' form field.".into(),
        ),
        GatewayFailure::Rejected(RejectionReason::PayloadTooLarge { max, .. }) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            format!("The upload exceeds the maximum size of {max} bytes."),
        ),
        GatewayFailure::Rejected(RejectionReason::UnsupportedMediaType { content_type }) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            codes::UNSUPPORTED_MEDIA_TYPE,
            format!("Files of type '{content_type}' are not supported."),
        ),
        GatewayFailure::InvalidSchema(name) => (
            StatusCode::BAD_REQUEST,
            codes::INVALID_SCHEMA,
            format!("Unknown extraction schema '{name}'. See GET /schemas for the available ones."),
        ),
        GatewayFailure::InvalidRequest(_) => (
            StatusCode::BAD_REQUEST,
            codes::INVALID_REQUEST,
            "The request must be multipart/form-data with a 'file' field.".into(),
        ),
        GatewayFailure::VisionUnavailable {
            class: FailureClass::Transient,
        } => (
            StatusCode::BAD_GATEWAY,
            codes::VISION_SERVICE_UNAVAILABLE,
            "The text recognition service is temporarily unavailable. Please retry later.".into(),
        ),
        GatewayFailure::VisionUnavailable {
            class: FailureClass::Permanent,
        } => (
            StatusCode::BAD_GATEWAY,
            codes::VISION_SERVICE_UNAVAILABLE,
            "The text recognition service could not process this document.".into(),
        ),
    }
}
