//! The operation shape every pipeline stage transforms: one request plus its
//! per-call context.

use std::sync::Arc;

use qbridge_core::Request;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context carried with every call through the pipeline.
///
/// Cloning shares the cancellation token, so every stage observes the same
/// cancellation signal.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Name of the binding this call is flowing through.
    pub binding: Arc<str>,
    /// Unique id for correlating log lines of one call.
    pub call_id: Uuid,
    /// Cancelled when the caller gives up or the binding stops.
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Creates a context rooted at the given cancellation token.
    #[must_use]
    pub fn new(binding: Arc<str>, cancel: CancellationToken) -> Self {
        Self {
            binding,
            call_id: Uuid::new_v4(),
            cancel,
        }
    }
}

/// One invocation travelling through the middleware chain. Immutable once
/// dispatched; the retry stage re-dispatches clones of the same value.
#[derive(Debug, Clone)]
pub struct Call {
    pub ctx: CallContext,
    pub request: Request,
}

/// Errors surfaced by the pipeline.
///
/// Retry exhaustion returns the last underlying target error as-is, so the
/// caller always sees the real failure cause rather than a synthetic
/// "retries exhausted" wrapper.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The call's context was cancelled before or during processing.
    #[error("call cancelled")]
    Cancelled,
    /// The target (or its backend) failed.
    #[error(transparent)]
    Target(#[from] anyhow::Error),
}
