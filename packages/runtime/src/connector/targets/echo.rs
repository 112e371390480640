//! Echo target: reflects each request back as its response.
//!
//! The optional `delay_ms` property simulates backend latency, which makes
//! this the standard stand-in when exercising rate limiting, retries, and
//! cancellation against a binding.

use std::time::Duration;

use async_trait::async_trait;
use qbridge_core::{
    ConnectorConfig, ConnectorDescriptor, PropertyKind, PropertySpec, Request, Response,
};

use crate::connector::Target;
use crate::pipeline::CallContext;

pub const KIND: &str = "echo.target";

#[must_use]
pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor::new(KIND)
        .name("Echo")
        .description("Reflects each request back as its response")
        .category("Testing")
        .provider("Builtin")
        .property(
            PropertySpec::new("delay_ms", PropertyKind::Int)
                .description("Simulated backend latency in milliseconds")
                .min(0)
                .default_value("0"),
        )
}

/// Request-reflecting backend.
pub struct EchoTarget {
    delay: Duration,
}

impl EchoTarget {
    #[must_use]
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

impl Default for EchoTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Target for EchoTarget {
    async fn init(&mut self, cfg: &ConnectorConfig) -> anyhow::Result<()> {
        #[allow(clippy::cast_sign_loss)]
        {
            self.delay = Duration::from_millis(
                cfg.get_i64_in("delay_ms", 0, 0, i64::from(u32::MAX))? as u64,
            );
        }
        Ok(())
    }

    async fn invoke(&self, ctx: &CallContext, request: &Request) -> anyhow::Result<Response> {
        if !self.delay.is_zero() {
            tokio::select! {
                () = ctx.cancel.cancelled() => anyhow::bail!("echo interrupted by cancellation"),
                () = tokio::time::sleep(self.delay) => {}
            }
        }
        let mut response = Response::new()
            .with_metadata("result", "ok")
            .with_data(request.data.clone());
        for (key, value) in request.metadata.iter() {
            response.metadata.set(key, value);
        }
        Ok(response)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn descriptor(&self) -> ConnectorDescriptor {
        descriptor()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
