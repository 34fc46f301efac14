#![deny(missing_docs)]

//! Core library for the Visiongate extraction gateway.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Request orchestration across the pipeline stages.
pub mod gateway;
/// Structured extraction over OCR text.
pub mod inference;
/// Structured logging and tracing setup.
pub mod logging;
/// Request outcome counters.
pub mod metrics;
/// Mapping of pipeline results onto HTTP responses.
pub mod response;
/// Retry and backoff for external calls.
pub mod retry;
/// Failure classification and HTTP helpers shared by the service clients.
pub mod upstream;
/// Upload checks performed before any external call.
pub mod validation;
/// OCR and label detection.
pub mod vision;
