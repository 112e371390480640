//! Retry middleware: bounded re-execution with exponential backoff.
//!
//! Sits inside rate limiting (attempts are not individually throttled) and
//! outside metrics (every underlying attempt is observed and reported).
//! After exhaustion the last attempt's error is returned unwrapped. A
//! cancelled context aborts retry scheduling immediately.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use qbridge_core::{Response, RetryConfig};
use tower::{Layer, Service, ServiceExt};

use super::call::{Call, PipelineError};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Backoff schedule for one binding's retry stage.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy from binding configuration.
    #[must_use]
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts,
            delay: Duration::from_millis(cfg.delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }

    /// Total number of attempts made. Zero configured attempts still means
    /// one unretried attempt.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Backoff before the retry following the `failed_attempts`-th failure
    /// (1-based): `min(delay * factor^(n-1), max_delay)`.
    ///
    /// The product is computed in `f64` seconds and clamped before it is
    /// turned back into a `Duration`, so deep attempt counts saturate
    /// instead of overflowing.
    #[must_use]
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        #[allow(clippy::cast_possible_wrap)]
        let scaled = self.delay.as_secs_f64() * self.backoff_factor.powi(exponent as i32);
        let capped = if self.max_delay.is_zero() {
            scaled
        } else {
            scaled.min(self.max_delay.as_secs_f64())
        };
        Duration::try_from_secs_f64(capped).unwrap_or(Duration::MAX)
    }
}

// ---------------------------------------------------------------------------
// RetryLayer
// ---------------------------------------------------------------------------

/// Tower layer re-executing failed calls per a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryService
// ---------------------------------------------------------------------------

/// Service wrapper dispatching up to `total_attempts()` clones of the same
/// immutable call.
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Service<Call> for RetryService<S>
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
        let policy = self.policy.clone();

        Box::pin(async move {
            let total = policy.total_attempts();
            let mut attempt = 0;
            loop {
                attempt += 1;
                if call.ctx.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                match inner.clone().oneshot(call.clone()).await {
                    Ok(response) => return Ok(response),
                    // Cancellation is never retried.
                    Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                    Err(error) if attempt >= total => return Err(error),
                    Err(error) => {
                        let delay = policy.delay_for(attempt);
                        tracing::debug!(
                            binding = %call.ctx.binding,
                            call_id = %call.ctx.call_id,
                            attempt,
                            backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "attempt failed, backing off"
                        );
                        tokio::select! {
                            () = call.ctx.cancel.cancelled() => {
                                return Err(PipelineError::Cancelled)
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
