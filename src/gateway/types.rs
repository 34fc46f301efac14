//! Results produced by the orchestrator.

use crate::inference::InferenceResult;
use crate::metrics::Outcome;
use crate::upstream::FailureClass;
use crate::validation::RejectionReason;
use crate::vision::VisionResult;
use std::fmt;

/// Stages of a single extraction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Payload accepted from the HTTP layer.
    Received,
    /// Upload and schema checks.
    Validating,
    /// Vision call in flight.
    ExtractingText,
    /// Inference call in flight.
    Inferring,
    /// Building the final result.
    Assembling,
    /// Terminal state.
    Done(Outcome),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::Validating => f.write_str("validating"),
            Self::ExtractingText => f.write_str("extracting_text"),
            Self::Inferring => f.write_str("inferring"),
            Self::Assembling => f.write_str("assembling"),
            Self::Done(Outcome::Succeeded) => f.write_str("done(success)"),
            Self::Done(Outcome::Partial) => f.write_str("done(partial)"),
            Self::Done(Outcome::Failed | Outcome::Rejected) => f.write_str("done(failure)"),
        }
    }
}

/// Why a request ended without an extraction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayFailure {
    /// The upload failed validation.
    Rejected(RejectionReason),
    /// The requested schema variant does not exist.
    InvalidSchema(String),
    /// The request body could not be read as an upload.
    InvalidRequest(String),
    /// The vision stage failed; carries how it failed for logging and messaging.
    VisionUnavailable {
        /// Class of the final vision failure.
        class: FailureClass,
    },
}

impl GatewayFailure {
    /// Whether the failure was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::VisionUnavailable { .. })
    }
}

/// Why the inference stage produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    /// The inference call failed after the retry policy gave up.
    InferenceFailed {
        /// Class of the final inference failure.
        class: FailureClass,
    },
    /// The request deadline expired while inference was running.
    DeadlineExceeded,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InferenceFailed {
                class: FailureClass::Transient,
            } => f.write_str(
                "Structured extraction is temporarily unavailable; returning recognized text only.",
            ),
            Self::InferenceFailed {
                class: FailureClass::Permanent,
            } => f.write_str(
                "Structured extraction could not be completed for this document; returning recognized text only.",
            ),
            Self::DeadlineExceeded => f.write_str(
                "Structured extraction did not finish within the request deadline; returning recognized text only.",
            ),
        }
    }
}

/// Final outcome of one extraction request. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResult {
    /// Both stages succeeded.
    Success {
        /// Schema variant that was filled.
        schema: String,
        /// Vision stage output.
        vision: VisionResult,
        /// Inference stage output.
        inference: InferenceResult,
    },
    /// Vision succeeded, inference did not.
    Partial {
        /// Schema variant that was requested.
        schema: String,
        /// Vision stage output.
        vision: VisionResult,
        /// Why inference is missing.
        reason: DegradedReason,
    },
    /// Nothing usable was produced.
    Failure(GatewayFailure),
}

impl GatewayResult {
    /// Counter bucket for this result.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Success { .. } => Outcome::Succeeded,
            Self::Partial { .. } => Outcome::Partial,
            Self::Failure(failure) if failure.is_client_error() => Outcome::Rejected,
            Self::Failure(_) => Outcome::Failed,
        }
    }

    /// Value of the `status` field in the response body.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Partial { .. } => "partial",
            Self::Failure(_) => "failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_bucketed_by_cause() {
        let rejected = GatewayResult::Failure(GatewayFailure::Rejected(RejectionReason::EmptyPayload));
        let failed = GatewayResult::Failure(GatewayFailure::VisionUnavailable {
            class: FailureClass::Transient,
        });
        assert_eq!(rejected.outcome(), Outcome::Rejected);
        assert_eq!(failed.outcome(), Outcome::Failed);
        assert_eq!(failed.status_label(), "failure");
    }

    #[test]
    fn degraded_reasons_are_never_empty() {
        for reason in [
            DegradedReason::DeadlineExceeded,
            DegradedReason::InferenceFailed {
                class: FailureClass::Transient,
            },
            DegradedReason::InferenceFailed {
                class: FailureClass::Permanent,
            },
        ] {
            assert!(!reason.to_string().is_empty());
        }
    }
}
