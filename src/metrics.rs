use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing request outcomes.
#[derive(Default)]
pub struct GatewayMetrics {
    requests: AtomicU64,
    succeeded: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Terminal outcome of one extraction request, as counted by [`GatewayMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Vision and inference both succeeded.
    Succeeded,
    /// Vision succeeded, inference degraded.
    Partial,
    /// Vision stage failed.
    Failed,
    /// Input was refused before any external call.
    Rejected,
}

impl GatewayMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an extraction request was received.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal outcome of a request.
    pub fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Succeeded => &self.succeeded,
            Outcome::Partial => &self.partial,
            Outcome::Failed => &self.failed,
            Outcome::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of request counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Extraction requests received since startup.
    pub requests: u64,
    /// Requests answered with a full result.
    pub succeeded: u64,
    /// Requests answered with vision output only.
    pub partial: u64,
    /// Requests that failed in the vision stage.
    pub failed: u64,
    /// Requests refused as invalid input.
    pub rejected: u64,
}
