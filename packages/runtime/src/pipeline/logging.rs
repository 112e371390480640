//! Logging middleware: the outermost stage, so it observes final outcomes
//! including retry exhaustion.
//!
//! The configured level only changes what is emitted, never control flow:
//! `debug` logs full request/response bodies, `info` logs metadata plus the
//! outcome, `error` logs failures only. Calls through to the inner stage
//! exactly once.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use qbridge_core::{LogLevel, Response};
use tower::{Layer, Service, ServiceExt};

use super::call::{Call, PipelineError};

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that logs each call's outcome at the binding's configured
/// verbosity.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    level: LogLevel,
}

impl LoggingLayer {
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            level: self.level,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

/// Service wrapper emitting one log record per completed call.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    level: LogLevel,
}

impl<S> Service<Call> for LoggingService<S>
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
        let level = self.level;
        let binding = call.ctx.binding.clone();
        let call_id = call.ctx.call_id;
        let request = call.request.clone();

        Box::pin(async move {
            let result = inner.oneshot(call).await;
            match (level, &result) {
                (LogLevel::Debug, Ok(response)) => {
                    tracing::debug!(
                        binding = %binding,
                        call_id = %call_id,
                        request = %request,
                        response = %response,
                        "request processed"
                    );
                }
                (LogLevel::Debug, Err(error)) => {
                    tracing::error!(
                        binding = %binding,
                        call_id = %call_id,
                        request = %request,
                        error = %error,
                        "request failed"
                    );
                }
                (LogLevel::Info, Ok(response)) => {
                    tracing::info!(
                        binding = %binding,
                        call_id = %call_id,
                        request = %request.metadata,
                        response = %response.metadata,
                        "request processed"
                    );
                }
                (LogLevel::Info | LogLevel::Error, Err(error)) => {
                    tracing::error!(
                        binding = %binding,
                        call_id = %call_id,
                        request = %request.metadata,
                        error = %error,
                        "request failed"
                    );
                }
                (LogLevel::Error, Ok(_)) => {}
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use qbridge_core::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::testing::{make_call, FailingService, OkService};

    #[tokio::test]
    async fn passes_response_through_unchanged() {
        let svc = LoggingLayer::new(LogLevel::Debug).layer(OkService::echoing());
        let call = make_call(Request::new().with_data("payload"));
        let response = svc.oneshot(call).await.unwrap();
        assert_eq!(response.data, "payload");
    }

    #[tokio::test]
    async fn passes_error_through_unchanged() {
        let svc = LoggingLayer::new(LogLevel::Error).layer(FailingService::always("backend down"));
        let err = svc.oneshot(make_call(Request::new())).await.unwrap_err();
        assert!(matches!(err, PipelineError::Target(e) if e.to_string() == "backend down"));
    }

    #[tokio::test]
    async fn calls_inner_exactly_once() {
        let inner = OkService::echoing();
        let calls = inner.calls();
        let svc = LoggingLayer::new(LogLevel::Info).layer(inner);
        svc.oneshot(make_call(Request::new())).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
