//! Metrics middleware: the innermost stage, adjacent to the target, so each
//! underlying attempt is reported — not the retry wrapper's outward result.
//!
//! Builds a fresh zeroed [`MetricReport`] per invocation and hands it to the
//! exporter synchronously after the inner call returns, success or failure
//! alike. Errors are observed, never suppressed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use qbridge_core::Response;
use tower::{Layer, Service, ServiceExt};

use super::call::{Call, PipelineError};
use crate::metrics::{MetricReport, MetricsExporter};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer producing one point-sample report per call.
#[derive(Clone)]
pub struct MetricsLayer {
    exporter: Arc<dyn MetricsExporter>,
    binding: Arc<str>,
    source_kind: Arc<str>,
    target_kind: Arc<str>,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(
        exporter: Arc<dyn MetricsExporter>,
        binding: Arc<str>,
        source_kind: &str,
        target_kind: &str,
    ) -> Self {
        Self {
            exporter,
            binding,
            source_kind: Arc::from(source_kind),
            target_kind: Arc::from(target_kind),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            exporter: self.exporter.clone(),
            binding: self.binding.clone(),
            source_kind: self.source_kind.clone(),
            target_kind: self.target_kind.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper reporting counters for exactly one inner invocation.
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    exporter: Arc<dyn MetricsExporter>,
    binding: Arc<str>,
    source_kind: Arc<str>,
    target_kind: Arc<str>,
}

impl<S> Service<Call> for MetricsService<S>
where
    S: Service<Call, Response = Response, Error = PipelineError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, PipelineError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let inner = self.inner.clone();
        let exporter = self.exporter.clone();
        let binding = self.binding.clone();
        let source_kind = self.source_kind.clone();
        let target_kind = self.target_kind.clone();
        let request_volume = call.request.size();

        Box::pin(async move {
            let result = inner.oneshot(call).await;

            let mut report =
                MetricReport::new(&*binding, &*source_kind, &*target_kind);
            report.request_count = 1;
            report.request_volume = request_volume;
            match &result {
                Ok(response) => {
                    report.response_count = 1;
                    report.response_volume = response.size();
                }
                Err(_) => report.errors_count = 1,
            }
            exporter.report(&report);

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
