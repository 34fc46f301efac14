mod support;

use axum::http::StatusCode;
use serde_json::{Value, json};
use support::{
    FakeInference, FakeVision, MAX_UPLOAD_BYTES, Reply, block, invalid_argument, jpeg, jpeg_named,
    orchestrator, policy, receipt_text, unavailable,
};
use std::time::Duration;
use tokio::time::Instant;
use visiongate::gateway::{DegradedReason, GatewayApi, GatewayFailure, GatewayResult};
use visiongate::response::assemble;
use visiongate::upstream::FailureClass;
use visiongate::validation::{RejectionReason, UploadPayload};
use visiongate::vision::VisionResult;

const DOCUMENT_FIELDS: [&str; 6] = [
    "author",
    "date",
    "document_type",
    "language",
    "summary",
    "title",
];

fn full_reply() -> Value {
    json!({
        "title": "ACME Store receipt",
        "document_type": "receipt",
        "date": null,
        "author": "ACME Store",
        "language": "en",
        "summary": "Receipt totalling 12.50.",
        "vendor_vat_id": "not declared",
        "_confidence": 0.92,
        "_explanation": "Store name and total are printed clearly."
    })
}

#[tokio::test]
async fn oversized_upload_is_rejected_without_external_calls() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let mut bytes = support::JPEG_BYTES.to_vec();
    bytes.resize(MAX_UPLOAD_BYTES + 1, 0);
    let result = gateway
        .process(UploadPayload::new(bytes, Some("image/jpeg".into()), None), None)
        .await;

    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error_code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(vision.calls(), 0);
    assert_eq!(inference.calls(), 0);
}

#[tokio::test]
async fn full_success_is_schema_complete() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), None).await;

    let GatewayResult::Success {
        schema,
        vision: vision_result,
        inference: inferred,
    } = &result
    else {
        panic!("expected success, got {result:?}");
    };
    assert_eq!(schema, "document");
    assert_eq!(vision_result.blocks.len(), 2);
    let keys: Vec<&str> = inferred.fields.keys().map(String::as_str).collect();
    assert_eq!(keys, DOCUMENT_FIELDS);
    assert_eq!(inferred.fields["date"], Value::Null);
    assert_eq!(inferred.confidence, Some(0.92));
    assert_eq!(inference.contexts(), vec!["ACME Store\n\nTotal 12.50".to_string()]);

    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["degraded"], false);
    assert!(body["inference"]["fields"].get("vendor_vat_id").is_none());
}

#[tokio::test]
async fn permanent_vision_failure_skips_inference() {
    let vision = FakeVision::new(|_| Reply::Ready(Err(invalid_argument())));
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), None).await;

    assert_eq!(
        result,
        GatewayResult::Failure(GatewayFailure::VisionUnavailable {
            class: FailureClass::Permanent
        })
    );
    assert_eq!(vision.calls(), 1);
    assert_eq!(inference.calls(), 0);
    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error_code"], "VISION_SERVICE_UNAVAILABLE");
    assert!(!body["message"].as_str().unwrap_or_default().contains("Bad image data"));
}

#[tokio::test]
async fn exhausted_inference_retries_degrade_to_partial() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::new(|_| Reply::Ready(Err(unavailable())));
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), None).await;

    assert_eq!(inference.calls(), policy().max_attempts);
    let GatewayResult::Partial {
        vision: vision_result,
        reason,
        ..
    } = &result
    else {
        panic!("expected partial, got {result:?}");
    };
    assert_eq!(vision_result, &receipt_text());
    assert_eq!(
        *reason,
        DegradedReason::InferenceFailed {
            class: FailureClass::Transient
        }
    );

    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["degraded"], true);
    assert!(body["inference"].is_null());
    assert!(!body["degraded_reason"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retries_never_exceed_the_maximum_and_stage_time_is_bounded() {
    let vision = FakeVision::new(|_| Reply::Hang);
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let started = Instant::now();
    let result = gateway.process(jpeg(), None).await;
    let elapsed = started.elapsed();

    assert_eq!(vision.calls(), policy().max_attempts);
    assert_eq!(inference.calls(), 0);
    // Timer resolution is one millisecond.
    let bound = policy().worst_case_duration() + Duration::from_millis(5);
    assert!(elapsed <= bound, "took {elapsed:?}");
    assert_eq!(
        result,
        GatewayResult::Failure(GatewayFailure::VisionUnavailable {
            class: FailureClass::Transient
        })
    );
}

#[tokio::test]
async fn transient_vision_failure_recovers_on_retry() {
    let vision = FakeVision::new(|attempt| {
        if attempt == 1 {
            Reply::Ready(Err(unavailable()))
        } else {
            Reply::Ready(Ok(receipt_text()))
        }
    });
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), None).await;

    assert!(matches!(result, GatewayResult::Success { .. }));
    assert_eq!(vision.calls(), 2);
    assert_eq!(inference.calls(), 1);
}

#[tokio::test]
async fn identical_submissions_are_independent() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let first = gateway.process(jpeg(), None).await;
    let second = gateway.process(jpeg(), None).await;

    assert_eq!(first, second);
    assert_eq!(vision.calls(), 2);
    assert_eq!(inference.calls(), 2);
    let snapshot = gateway.metrics_snapshot();
    assert_eq!((snapshot.requests, snapshot.succeeded), (2, 2));
}

#[tokio::test]
async fn concurrent_submissions_do_not_share_state() {
    // The first upload is annotated slower, so its inference call starts second.
    let vision = FakeVision::per_upload(|_, upload| {
        let (text, wait) = match upload.filename() {
            Some("alpha.jpg") => ("Alpha", Duration::from_millis(60)),
            _ => ("Bravo", Duration::from_millis(5)),
        };
        Reply::Delayed(
            wait,
            Ok(VisionResult {
                blocks: vec![block(text)],
                labels: vec![],
            }),
        )
    });
    let inference = FakeInference::echoing();
    let gateway = orchestrator(vision.clone(), inference.clone());

    let (alpha, bravo) = tokio::join!(
        gateway.process(jpeg_named("alpha.jpg"), None),
        gateway.process(jpeg_named("bravo.jpg"), None),
    );

    for (result, expected) in [(&alpha, "Alpha"), (&bravo, "Bravo")] {
        let GatewayResult::Success {
            vision: vision_result,
            inference: inferred,
            ..
        } = result
        else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(vision_result.blocks[0].text, expected);
        assert_eq!(inferred.fields["title"], json!(expected));
    }
    assert_eq!(inference.contexts(), vec!["Bravo".to_string(), "Alpha".to_string()]);
    let snapshot = gateway.metrics_snapshot();
    assert_eq!((snapshot.requests, snapshot.succeeded), (2, 2));
}

#[tokio::test]
async fn dropped_request_abandons_the_vision_call() {
    let vision = FakeVision::new(|_| Reply::Hang);
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        gateway.process(jpeg(), None),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(vision.calls(), 1);
    assert_eq!(vision.cancelled(), 1);
    assert_eq!(inference.calls(), 0);
}

#[tokio::test]
async fn dropped_request_abandons_the_inference_call() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::new(|_| Reply::Hang);
    let gateway = orchestrator(vision.clone(), inference.clone());

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        gateway.process(jpeg(), None),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(inference.calls(), 1);
    assert_eq!(inference.cancelled(), 1);
    assert_eq!(vision.cancelled(), 0);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway
        .process(UploadPayload::new(Vec::new(), Some("image/jpeg".into()), None), None)
        .await;

    assert_eq!(
        result,
        GatewayResult::Failure(GatewayFailure::Rejected(RejectionReason::EmptyPayload))
    );
    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "EMPTY_PAYLOAD");
    assert_eq!(vision.calls(), 0);
}

#[tokio::test]
async fn zero_text_blocks_yield_success_with_null_fields() {
    let vision = FakeVision::returning(VisionResult::default());
    let inference = FakeInference::returning(json!({}));
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), None).await;

    let GatewayResult::Success {
        vision: vision_result,
        inference: inferred,
        ..
    } = &result
    else {
        panic!("expected success, got {result:?}");
    };
    assert!(vision_result.blocks.is_empty());
    assert_eq!(inferred.fields.len(), DOCUMENT_FIELDS.len());
    assert!(inferred.is_all_null());
    assert_eq!(inference.contexts(), vec![String::new()]);
}

#[tokio::test(start_paused = true)]
async fn inference_timeouts_on_every_attempt_yield_partial() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::new(|_| Reply::Hang);
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), None).await;

    assert_eq!(inference.calls(), policy().max_attempts);
    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert!(!body["degraded_reason"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_schema_is_rejected_before_any_call() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway.process(jpeg(), Some("passport")).await;

    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_SCHEMA");
    assert_eq!(vision.calls(), 0);
    assert_eq!(inference.calls(), 0);
}

#[tokio::test]
async fn declared_type_contradicting_contents_is_unsupported() {
    let vision = FakeVision::returning(receipt_text());
    let inference = FakeInference::returning(full_reply());
    let gateway = orchestrator(vision.clone(), inference.clone());

    let result = gateway
        .process(
            UploadPayload::new(b"%PDF-1.7 body".to_vec(), Some("image/png".into()), None),
            None,
        )
        .await;

    let (status, body) = assemble(&result);
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error_code"], "UNSUPPORTED_MEDIA_TYPE");
    assert_eq!(vision.calls(), 0);
}
