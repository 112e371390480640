//! Middleware pipeline around target invocation.
//!
//! Stage order is fixed: logging wraps rate limiting wraps retry wraps
//! metrics wraps the target itself. The ordering is a contract, not an
//! implementation detail: logging sees final outcomes, one rate permit
//! covers all retry attempts, and metrics observes every underlying
//! attempt individually.

pub mod call;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use qbridge_core::{MiddlewareConfig, Request, Response};
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder, ServiceExt};

pub use call::{Call, CallContext, PipelineError};
pub use logging::LoggingLayer;
pub use metrics::MetricsLayer;
pub use rate_limit::RateLimitLayer;
pub use retry::{RetryLayer, RetryPolicy};

use crate::connector::{RequestHandler, Target};
use crate::metrics::MetricsExporter;

// ---------------------------------------------------------------------------
// TargetService
// ---------------------------------------------------------------------------

/// Innermost service: one target invocation per call.
#[derive(Clone)]
pub struct TargetService {
    target: Arc<dyn Target>,
}

impl TargetService {
    #[must_use]
    pub fn new(target: Arc<dyn Target>) -> Self {
        Self { target }
    }
}

impl Service<Call> for TargetService {
    type Response = Response;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, PipelineError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let target = self.target.clone();
        Box::pin(async move {
            if call.ctx.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            target
                .invoke(&call.ctx, &call.request)
                .await
                .map_err(PipelineError::Target)
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The assembled middleware chain for one binding, handed to its source as
/// the dispatch handle.
///
/// Cloning is cheap; all clones share the binding's root cancellation token,
/// and each dispatched call gets a child token so stopping the binding
/// aborts in-flight work.
#[derive(Clone)]
pub struct Pipeline {
    binding: Arc<str>,
    service: BoxCloneSyncService<Call, Response, PipelineError>,
    cancel_root: CancellationToken,
}

impl Pipeline {
    /// Runs one request through the full stage chain.
    pub async fn dispatch(&self, request: Request) -> Result<Response, PipelineError> {
        let ctx = CallContext::new(self.binding.clone(), self.cancel_root.child_token());
        self.service.clone().oneshot(Call { ctx, request }).await
    }
}

#[async_trait]
impl RequestHandler for Pipeline {
    async fn handle(&self, request: Request) -> Result<Response, PipelineError> {
        self.dispatch(request).await
    }
}

/// Assembles the stage chain for one binding.
///
/// `ServiceBuilder` layers outermost-first, so the declaration order below
/// is the runtime nesting order.
#[must_use]
pub fn build_pipeline(
    binding: Arc<str>,
    source_kind: &str,
    target_kind: &str,
    cfg: &MiddlewareConfig,
    target: Arc<dyn Target>,
    exporter: Arc<dyn MetricsExporter>,
    cancel_root: CancellationToken,
) -> Pipeline {
    let service = ServiceBuilder::new()
        .layer(LoggingLayer::new(cfg.log_level))
        .layer(RateLimitLayer::new(cfg.rate_per_second))
        .layer(RetryLayer::new(RetryPolicy::from_config(&cfg.retry)))
        .layer(MetricsLayer::new(
            exporter,
            binding.clone(),
            source_kind,
            target_kind,
        ))
        .service(TargetService::new(target));

    Pipeline {
        binding,
        service: BoxCloneSyncService::new(service),
        cancel_root,
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::future::{ready, Ready};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use parking_lot::Mutex;
    use qbridge_core::{Request, Response};
    use tokio_util::sync::CancellationToken;
    use tower::Service;

    use super::{Call, CallContext, PipelineError};
    use crate::metrics::{MetricReport, MetricsExporter};

    pub fn make_call(request: Request) -> Call {
        Call {
            ctx: CallContext::new(Arc::from("test-binding"), CancellationToken::new()),
            request,
        }
    }

    pub fn make_cancelled_call(request: Request) -> Call {
        let call = make_call(request);
        call.ctx.cancel.cancel();
        call
    }

    /// Inner stage that echoes the request data and counts invocations.
    #[derive(Clone)]
    pub struct OkService {
        calls: Arc<AtomicU32>,
    }

    impl OkService {
        pub fn echoing() -> Self {
            Self {
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        pub fn calls(&self) -> Arc<AtomicU32> {
            self.calls.clone()
        }
    }

    impl Service<Call> for OkService {
        type Response = Response;
        type Error = PipelineError;
        type Future = Ready<Result<Response, PipelineError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ready(Ok(Response::new()
                .with_metadata("result", "ok")
                .with_data(call.request.data)))
        }
    }

    /// Inner stage that fails the first `failures` invocations, then echoes.
    #[derive(Clone)]
    pub struct FailingService {
        calls: Arc<AtomicU32>,
        failures: u32,
        message: &'static str,
    }

    impl FailingService {
        pub fn always(message: &'static str) -> Self {
            Self::failing_times(u32::MAX, message)
        }

        pub fn failing_times(failures: u32, message: &'static str) -> Self {
            Self {
                calls: Arc::new(AtomicU32::new(0)),
                failures,
                message,
            }
        }

        pub fn calls(&self) -> Arc<AtomicU32> {
            self.calls.clone()
        }
    }

    impl Service<Call> for FailingService {
        type Response = Response;
        type Error = PipelineError;
        type Future = Ready<Result<Response, PipelineError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                ready(Err(PipelineError::Target(anyhow::anyhow!(self.message))))
            } else {
                ready(Ok(Response::new()
                    .with_metadata("result", "ok")
                    .with_data(call.request.data)))
            }
        }
    }

    /// Exporter capturing every report for assertions.
    #[derive(Default)]
    pub struct CollectingExporter {
        reports: Mutex<Vec<MetricReport>>,
    }

    impl CollectingExporter {
        pub fn reports(&self) -> Vec<MetricReport> {
            self.reports.lock().clone()
        }
    }

    impl MetricsExporter for CollectingExporter {
        fn report(&self, report: &MetricReport) {
            self.reports.lock().push(report.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use qbridge_core::{
        ConnectorConfig, ConnectorDescriptor, MiddlewareConfig, Request, Response, RetryConfig,
    };
    use tokio_util::sync::CancellationToken;

    use super::testing::CollectingExporter;
    use super::*;

    /// Target that fails its first `failures` invocations, then echoes.
    struct FlakyTarget {
        calls: AtomicU32,
        failures: u32,
    }

    impl FlakyTarget {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl Target for FlakyTarget {
        async fn init(&mut self, _cfg: &ConnectorConfig) -> anyhow::Result<()> {
            Ok(())
        }

        async fn invoke(
            &self,
            _ctx: &CallContext,
            request: &Request,
        ) -> anyhow::Result<Response> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("flaky backend");
            }
            Ok(Response::new()
                .with_metadata("result", "ok")
                .with_data(request.data.clone()))
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn descriptor(&self) -> ConnectorDescriptor {
            ConnectorDescriptor::new("flaky.target")
        }
    }

    fn middleware(attempts: u32) -> MiddlewareConfig {
        MiddlewareConfig {
            retry: RetryConfig {
                attempts,
                delay_ms: 1,
                ..RetryConfig::default()
            },
            ..MiddlewareConfig::default()
        }
    }

    fn pipeline(
        target: Arc<dyn Target>,
        exporter: Arc<CollectingExporter>,
        attempts: u32,
        cancel_root: CancellationToken,
    ) -> Pipeline {
        build_pipeline(
            Arc::from("orders"),
            "echo.source",
            "echo.target",
            &middleware(attempts),
            target,
            exporter,
            cancel_root,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_sits_inside_retry_and_sees_every_attempt() {
        let exporter = Arc::new(CollectingExporter::default());
        let pipeline = pipeline(
            Arc::new(FlakyTarget::new(1)),
            exporter.clone(),
            3,
            CancellationToken::new(),
        );

        let response = pipeline
            .handle(Request::new().with_data("hello"))
            .await
            .unwrap();
        assert_eq!(response.data, "hello");
        assert_eq!(response.metadata.get("result"), Some("ok"));

        // One report per underlying attempt: first errored, second succeeded.
        let reports = exporter.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].errors_count, 1);
        assert_eq!(reports[1].response_count, 1);
        assert_eq!(reports[1].response_volume, 5);
    }

    #[tokio::test]
    async fn stopped_binding_root_cancels_new_dispatches() {
        let exporter = Arc::new(CollectingExporter::default());
        let cancel_root = CancellationToken::new();
        let pipeline = pipeline(
            Arc::new(FlakyTarget::new(0)),
            exporter,
            1,
            cancel_root.clone(),
        );

        cancel_root.cancel();
        let err = pipeline.handle(Request::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn clones_share_the_same_root_token() {
        let exporter = Arc::new(CollectingExporter::default());
        let cancel_root = CancellationToken::new();
        let pipeline = pipeline(
            Arc::new(FlakyTarget::new(0)),
            exporter,
            1,
            cancel_root.clone(),
        );
        let clone = pipeline.clone();

        clone.handle(Request::new()).await.unwrap();
        cancel_root.cancel();
        let err = clone.handle(Request::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
