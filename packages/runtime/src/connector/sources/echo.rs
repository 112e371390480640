//! Echo source: emits synthetic requests on a fixed interval.
//!
//! Useful for smoke-testing a binding without a real queue: each tick
//! dispatches one request with a configured payload through the pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use qbridge_core::{ConnectorConfig, ConnectorDescriptor, PropertyKind, PropertySpec, Request};
use tokio_util::sync::CancellationToken;

use crate::connector::{RequestHandler, Source};

pub const KIND: &str = "echo.source";

#[must_use]
pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor::new(KIND)
        .name("Echo")
        .description("Emits synthetic requests on a fixed interval")
        .category("Testing")
        .provider("Builtin")
        .property(
            PropertySpec::new("data", PropertyKind::String)
                .description("Payload of every emitted request")
                .default_value("ping"),
        )
        .property(
            PropertySpec::new("count", PropertyKind::Int)
                .description("Number of requests to emit; 0 means unbounded")
                .min(0)
                .default_value("0"),
        )
        .property(
            PropertySpec::new("interval_ms", PropertyKind::Int)
                .description("Milliseconds between emissions")
                .min(1)
                .default_value("1000"),
        )
}

/// Interval-driven request generator.
pub struct EchoSource {
    data: Bytes,
    count: u64,
    interval: Duration,
    cancel: CancellationToken,
}

impl EchoSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Bytes::from_static(b"ping"),
            count: 0,
            interval: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for EchoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for EchoSource {
    async fn init(&mut self, cfg: &ConnectorConfig) -> anyhow::Result<()> {
        self.data = Bytes::from(cfg.get_str("data", "ping").to_string());
        #[allow(clippy::cast_sign_loss)]
        {
            self.count = cfg.get_i64_in("count", 0, 0, i64::MAX)? as u64;
            self.interval = Duration::from_millis(
                cfg.get_i64_in("interval_ms", 1000, 1, i64::from(u32::MAX))? as u64,
            );
        }
        Ok(())
    }

    async fn start(&self, handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
        let data = self.data.clone();
        let count = self.count;
        let interval = self.interval;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut emitted: u64 = 0;
            loop {
                if count > 0 && emitted >= count {
                    tracing::debug!(emitted, "echo source finished");
                    return;
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(interval) => {}
                }
                emitted += 1;
                let request = Request::new().with_data(data.clone());
                if let Err(error) = handler.handle(request).await {
                    tracing::debug!(%error, "echo request failed");
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn descriptor(&self) -> ConnectorDescriptor {
        descriptor()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use qbridge_core::Response;

    use super::*;
    use crate::pipeline::PipelineError;

    struct CountingHandler {
        handled: AtomicU32,
    }

    #[async_trait]
    impl RequestHandler for CountingHandler {
        async fn handle(&self, request: Request) -> Result<Response, PipelineError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new().with_data(request.data))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_the_configured_count_then_stops() {
        let mut source = EchoSource::new();
        let cfg = ConnectorConfig::new(KIND)
            .with_property("data", "hello")
            .with_property("count", "3")
            .with_property("interval_ms", "10");
        source.init(&cfg).await.unwrap();

        let handler = Arc::new(CountingHandler {
            handled: AtomicU32::new(0),
        });
        source.start(handler.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_an_unbounded_source() {
        let mut source = EchoSource::new();
        let cfg = ConnectorConfig::new(KIND).with_property("interval_ms", "10");
        source.init(&cfg).await.unwrap();

        let handler = Arc::new(CountingHandler {
            handled: AtomicU32::new(0),
        });
        source.start(handler.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(35)).await;
        source.stop().await.unwrap();
        let emitted = handler.handled.load(Ordering::SeqCst);
        assert!(emitted >= 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), emitted);
    }

    #[tokio::test]
    async fn rejects_malformed_interval() {
        let mut source = EchoSource::new();
        let cfg = ConnectorConfig::new(KIND).with_property("interval_ms", "soon");
        assert!(source.init(&cfg).await.is_err());
    }

    #[test]
    fn descriptor_is_internally_consistent() {
        descriptor().validate().unwrap();
    }
}
