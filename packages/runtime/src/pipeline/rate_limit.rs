//! Rate-limiting middleware: paces calls before any retry attempts are
//! spent.
//!
//! Sits outside the retry stage by contract, so one permit covers one
//! logical call however many attempts the retry stage makes underneath.
//! Never rejects; it only delays. Pass-through when the binding has no
//! configured rate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use qbridge_core::Response;
use tower::{Layer, Service, ServiceExt};

use super::call::{Call, PipelineError};
use crate::limiter::RateLimiter;

// ---------------------------------------------------------------------------
// RateLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer throttling calls through a shared [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Option<Arc<RateLimiter>>,
}

impl RateLimitLayer {
    /// Creates a layer for the configured rate; 0 means no throttling.
    #[must_use]
    pub fn new(rate_per_second: u32) -> Self {
        let limiter = (rate_per_second > 0).then(|| Arc::new(RateLimiter::new(rate_per_second)));
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitService
// ---------------------------------------------------------------------------

/// Service wrapper that waits for a permit, then calls through exactly once.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Option<Arc<RateLimiter>>,
}

impl<S> Service<Call> for RateLimitService<S>
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
        let limiter = self.limiter.clone();

        Box::pin(async move {
            if let Some(limiter) = limiter {
                // An already-cancelled call must not claim a schedule slot.
                // Cancellation arriving mid-wait keeps the claimed slot; the
                // schedule is never rolled back.
                if call.ctx.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                tokio::select! {
                    () = call.ctx.cancel.cancelled() => return Err(PipelineError::Cancelled),
                    () = limiter.take() => {}
                }
            }
            inner.oneshot(call).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use qbridge_core::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::testing::{make_call, make_cancelled_call, OkService};

    #[tokio::test(start_paused = true)]
    async fn unconfigured_rate_is_pass_through() {
        let svc = RateLimitLayer::new(0).layer(OkService::echoing());
        let start = tokio::time::Instant::now();
        for _ in 0..10 {
            svc.clone().oneshot(make_call(Request::new())).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_successive_calls() {
        let svc = RateLimitLayer::new(50).layer(OkService::echoing());
        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            svc.clone().oneshot(make_call(Request::new())).await.unwrap();
        }
        // 5 calls at 50/s take at least (5-1)/50 = 80ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_does_not_consume_a_slot() {
        let svc = RateLimitLayer::new(50).layer(OkService::echoing()); // 20ms interval
        svc.clone().oneshot(make_call(Request::new())).await.unwrap();

        let err = svc
            .clone()
            .oneshot(make_cancelled_call(Request::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));

        // The next live call takes the second slot, not the third.
        let start = tokio::time::Instant::now();
        svc.oneshot(make_call(Request::new())).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_aborts_while_waiting() {
        let svc = RateLimitLayer::new(1).layer(OkService::echoing());
        // Spend the immediate slot so the next call must wait a full second.
        svc.clone().oneshot(make_call(Request::new())).await.unwrap();
        let err = svc
            .oneshot(make_cancelled_call(Request::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
