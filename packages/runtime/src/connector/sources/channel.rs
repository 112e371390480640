//! Channel source: an in-process request/reply bridge.
//!
//! Callers hold a [`ChannelClient`] and await the pipeline's response for
//! each submitted request. The embedding side of the runtime uses this to
//! drive bindings without a queue.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use qbridge_core::{ConnectorConfig, ConnectorDescriptor, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::connector::{RequestHandler, Source};
use crate::pipeline::PipelineError;

pub const KIND: &str = "channel.source";

#[must_use]
pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor::new(KIND)
        .name("Channel")
        .description("In-process request/reply bridge")
        .category("Testing")
        .provider("Builtin")
}

struct ChannelMessage {
    request: Request,
    reply: oneshot::Sender<Result<Response, PipelineError>>,
}

/// Submits requests into a started [`ChannelSource`] and awaits responses.
#[derive(Clone)]
pub struct ChannelClient {
    tx: mpsc::Sender<ChannelMessage>,
}

impl ChannelClient {
    /// Runs one request through the binding's pipeline and returns its
    /// response.
    ///
    /// # Errors
    ///
    /// Fails when the source is stopped or the pipeline rejects the call.
    pub async fn request(&self, request: Request) -> anyhow::Result<Response> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ChannelMessage { request, reply })
            .await
            .map_err(|_| anyhow::anyhow!("channel source is stopped"))?;
        response
            .await
            .map_err(|_| anyhow::anyhow!("channel source dropped the call"))?
            .map_err(anyhow::Error::from)
    }
}

/// Source half of the bridge; dispatches each submitted request through the
/// pipeline handle it is started with.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::Receiver<ChannelMessage>>>,
    cancel: CancellationToken,
}

impl ChannelSource {
    /// Creates a connected source/client pair.
    #[must_use]
    pub fn pair() -> (Self, ChannelClient) {
        let (tx, rx) = mpsc::channel(64);
        let source = Self {
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
        };
        (source, ChannelClient { tx })
    }
}

#[async_trait]
impl Source for ChannelSource {
    async fn init(&mut self, _cfg: &ConnectorConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start(&self, handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
        let Some(mut rx) = self.rx.lock().take() else {
            anyhow::bail!("channel source already started");
        };
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => return,
                    message = rx.recv() => match message {
                        Some(message) => message,
                        None => return,
                    },
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let result = handler.handle(message.request).await;
                    // The client may have given up waiting; nothing to do.
                    let _ = message.reply.send(result);
                });
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
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: Request) -> Result<Response, PipelineError> {
            Ok(Response::new()
                .with_metadata("result", "ok")
                .with_data(request.data))
        }
    }

    #[tokio::test]
    async fn round_trips_a_request() {
        let (mut source, client) = ChannelSource::pair();
        source.init(&ConnectorConfig::new(KIND)).await.unwrap();
        source.start(Arc::new(EchoHandler)).await.unwrap();

        let response = client
            .request(Request::new().with_data("payload"))
            .await
            .unwrap();
        assert_eq!(response.data, "payload");
        assert_eq!(response.metadata.get("result"), Some("ok"));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (source, _client) = ChannelSource::pair();
        source.start(Arc::new(EchoHandler)).await.unwrap();
        assert!(source.start(Arc::new(EchoHandler)).await.is_err());
    }

    #[tokio::test]
    async fn requests_after_stop_fail() {
        let (source, client) = ChannelSource::pair();
        source.start(Arc::new(EchoHandler)).await.unwrap();
        source.stop().await.unwrap();
        // Let the consume loop observe cancellation and drop its receiver.
        tokio::task::yield_now().await;
        assert!(client.request(Request::new()).await.is_err());
    }
}
