#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visiongate::gateway::Orchestrator;
use visiongate::inference::{
    InferenceBackend, InferenceRequest, SchemaRegistry, StructuredInference,
};
use visiongate::retry::RetryPolicy;
use visiongate::upstream::UpstreamError;
use visiongate::validation::{UploadPayload, UploadValidator, ValidatedUpload};
use visiongate::vision::{TextBlock, VisionBackend, VisionExtractor, VisionResult};

pub const MAX_UPLOAD_BYTES: usize = 1024;
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// What a fake backend does on a given attempt.
pub enum Reply<T> {
    Ready(Result<T, UpstreamError>),
    /// Completes after the given wait.
    Delayed(Duration, Result<T, UpstreamError>),
    /// Never completes; only the per-call timeout ends the attempt.
    Hang,
}

impl<T> Reply<T> {
    async fn play(self, cancelled: &Arc<AtomicU32>) -> Result<T, UpstreamError> {
        let mut guard = CancelGuard {
            cancelled: Arc::clone(cancelled),
            armed: true,
        };
        let result = match self {
            Reply::Ready(result) => result,
            Reply::Delayed(wait, result) => {
                tokio::time::sleep(wait).await;
                result
            }
            Reply::Hang => std::future::pending().await,
        };
        guard.armed = false;
        result
    }
}

/// Counts calls whose future was dropped before it produced a result.
struct CancelGuard {
    cancelled: Arc<AtomicU32>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

type Script<I, T> = Box<dyn Fn(u32, &I) -> Reply<T> + Send + Sync>;

/// Vision backend driven by a per-attempt script.
pub struct FakeVision {
    calls: AtomicU32,
    cancelled: Arc<AtomicU32>,
    script: Script<ValidatedUpload, VisionResult>,
}

impl FakeVision {
    pub fn new(script: impl Fn(u32) -> Reply<VisionResult> + Send + Sync + 'static) -> Arc<Self> {
        Self::per_upload(move |attempt, _| script(attempt))
    }

    /// Script that also sees the upload being annotated.
    pub fn per_upload(
        script: impl Fn(u32, &ValidatedUpload) -> Reply<VisionResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            cancelled: Arc::new(AtomicU32::new(0)),
            script: Box::new(script),
        })
    }

    pub fn returning(result: VisionResult) -> Arc<Self> {
        Self::new(move |_| Reply::Ready(Ok(result.clone())))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> u32 {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionBackend for FakeVision {
    async fn annotate(&self, upload: &ValidatedUpload) -> Result<VisionResult, UpstreamError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(attempt, upload).play(&self.cancelled).await
    }
}

/// Inference backend driven by a per-attempt script; records the text it was given.
pub struct FakeInference {
    calls: AtomicU32,
    cancelled: Arc<AtomicU32>,
    contexts: Mutex<Vec<String>>,
    script: Script<InferenceRequest, Map<String, Value>>,
}

impl FakeInference {
    pub fn new(
        script: impl Fn(u32) -> Reply<Map<String, Value>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::per_request(move |attempt, _| script(attempt))
    }

    /// Script that also sees the request being answered.
    pub fn per_request(
        script: impl Fn(u32, &InferenceRequest) -> Reply<Map<String, Value>>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            cancelled: Arc::new(AtomicU32::new(0)),
            contexts: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    pub fn returning(output: Value) -> Arc<Self> {
        let map = object(output);
        Self::new(move |_| Reply::Ready(Ok(map.clone())))
    }

    /// Answers with the text context as the `title` field.
    pub fn echoing() -> Arc<Self> {
        Self::per_request(|_, request| {
            Reply::Ready(Ok(object(json!({ "title": request.text_context }))))
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> u32 {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().expect("lock").clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeInference {
    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<Map<String, Value>, UpstreamError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.contexts
            .lock()
            .expect("lock")
            .push(request.text_context.clone());
        (self.script)(attempt, request).play(&self.cancelled).await
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(40),
        call_timeout: Duration::from_secs(2),
    }
}

pub fn orchestrator(vision: Arc<FakeVision>, inference: Arc<FakeInference>) -> Orchestrator {
    let policy = policy();
    let deadline = policy.worst_case_duration() * 2 + Duration::from_secs(1);
    Orchestrator::new(
        UploadValidator::new(
            MAX_UPLOAD_BYTES,
            vec!["image/jpeg".into(), "image/png".into(), "application/pdf".into()],
        ),
        VisionExtractor::new(vision, policy),
        StructuredInference::new(inference, policy),
        SchemaRegistry::load(None, "document").expect("schemas"),
        deadline,
    )
}

pub fn jpeg() -> UploadPayload {
    jpeg_named("receipt.jpg")
}

pub fn jpeg_named(filename: &str) -> UploadPayload {
    UploadPayload::new(
        JPEG_BYTES.to_vec(),
        Some("image/jpeg".into()),
        Some(filename.into()),
    )
}

pub fn block(text: &str) -> TextBlock {
    TextBlock {
        text: text.into(),
        confidence: Some(0.9),
        bounding_box: None,
        page: None,
    }
}

pub fn receipt_text() -> VisionResult {
    VisionResult {
        blocks: vec![block("ACME Store"), block("Total 12.50")],
        labels: vec![],
    }
}

pub fn unavailable() -> UpstreamError {
    UpstreamError::UnexpectedStatus {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "backend unavailable".into(),
    }
}

pub fn invalid_argument() -> UpstreamError {
    UpstreamError::Provider {
        code: 3,
        status: "INVALID_ARGUMENT".into(),
        message: "Bad image data.".into(),
    }
}
