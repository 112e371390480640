//! The kind-polymorphic collaborator contract every backend implements.
//!
//! A **source** is queue-facing: it originates [`Request`]s from inbound
//! messages and feeds them into the pipeline handle it is started with. A
//! **target** is backend-facing: it executes one request against an external
//! system. The runtime core never sees concrete implementations; it creates
//! them through the [`registry`] by kind string.

pub mod registry;
pub mod sources;
pub mod targets;

use async_trait::async_trait;
use qbridge_core::{ConnectorConfig, ConnectorDescriptor, Request, Response};

use crate::pipeline::{CallContext, PipelineError};

/// Backend-facing collaborator: executes one unit of work per request.
///
/// `invoke` may be called concurrently and repeatedly, including by the retry
/// stage; implementations must tolerate re-invocation of the same request.
#[async_trait]
pub trait Target: Send + Sync {
    /// Validates configuration and establishes backend connections.
    /// Must not leak partial resources on failure.
    async fn init(&mut self, cfg: &ConnectorConfig) -> anyhow::Result<()>;

    /// Performs one unit of backend work. Cancellation is signalled via
    /// `ctx.cancel` and should abort in-flight network calls.
    async fn invoke(&self, ctx: &CallContext, request: &Request) -> anyhow::Result<Response>;

    /// Releases all resources. Safe to call even if `init` failed part-way.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Static self-description used for validation and manifest export.
    fn descriptor(&self) -> ConnectorDescriptor;
}

/// Queue-facing collaborator: originates requests from inbound messages.
#[async_trait]
pub trait Source: Send + Sync {
    /// Validates configuration and establishes queue connections.
    async fn init(&mut self, cfg: &ConnectorConfig) -> anyhow::Result<()>;

    /// Begins consuming messages, dispatching each through `handler`.
    /// Non-blocking: implementations spawn their consume loop and return.
    async fn start(&self, handler: std::sync::Arc<dyn RequestHandler>) -> anyhow::Result<()>;

    /// Stops consuming and releases resources. Safe after failed `init`.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Static self-description used for validation and manifest export.
    fn descriptor(&self) -> ConnectorDescriptor;
}

/// The pipeline handle a source dispatches into: one middleware-wrapped
/// target call per request. Implemented by [`crate::pipeline::Pipeline`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Runs one request through the full middleware chain.
    async fn handle(&self, request: Request) -> Result<Response, PipelineError>;
}
