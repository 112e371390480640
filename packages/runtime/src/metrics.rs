//! Per-call metric reporting.
//!
//! The metrics stage computes one [`MetricReport`] per pipeline call — a
//! point-sample, not a running total — and hands it synchronously to a
//! [`MetricsExporter`]. Aggregation across calls is the exporter's
//! responsibility; the runtime never accumulates counters internally.

use metrics::counter;

/// Counters for exactly one pipeline call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricReport {
    pub binding: String,
    pub source_kind: String,
    pub target_kind: String,
    /// 1 for every dispatched request.
    pub request_count: u64,
    /// Request payload bytes.
    pub request_volume: u64,
    /// 1 when the call produced a response, 0 on error.
    pub response_count: u64,
    /// Response payload bytes.
    pub response_volume: u64,
    /// 1 when the call failed, 0 otherwise.
    pub errors_count: u64,
}

impl MetricReport {
    /// Creates a zeroed report for one call on the given binding.
    #[must_use]
    pub fn new(
        binding: impl Into<String>,
        source_kind: impl Into<String>,
        target_kind: impl Into<String>,
    ) -> Self {
        Self {
            binding: binding.into(),
            source_kind: source_kind.into(),
            target_kind: target_kind.into(),
            ..Self::default()
        }
    }
}

/// Receives one report per pipeline call, synchronously, after the inner
/// call returns — success or failure alike.
pub trait MetricsExporter: Send + Sync {
    fn report(&self, report: &MetricReport);
}

/// Default exporter: folds point-samples into monotonic counters via the
/// `metrics` facade, labelled by binding, for the prometheus recorder
/// installed at process bootstrap.
#[derive(Debug, Clone, Default)]
pub struct RuntimeExporter;

impl MetricsExporter for RuntimeExporter {
    fn report(&self, report: &MetricReport) {
        let binding = report.binding.clone();
        counter!("qbridge_requests_total", "binding" => binding.clone())
            .increment(report.request_count);
        counter!("qbridge_request_bytes_total", "binding" => binding.clone())
            .increment(report.request_volume);
        counter!("qbridge_responses_total", "binding" => binding.clone())
            .increment(report.response_count);
        counter!("qbridge_response_bytes_total", "binding" => binding.clone())
            .increment(report.response_volume);
        counter!("qbridge_errors_total", "binding" => binding).increment(report.errors_count);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
