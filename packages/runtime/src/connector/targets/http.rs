//! HTTP target: executes one outbound HTTP request per pipeline call.
//!
//! The request metadata selects method and URL per call; metadata keys
//! prefixed with `header.` become request headers. The request payload is
//! sent as the body verbatim, and the response carries the status code in
//! metadata with the response body as data.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use qbridge_core::{
    ConnectorConfig, ConnectorDescriptor, MetadataFieldSpec, PropertyKind, PropertySpec, Request,
    Response,
};

use crate::connector::Target;
use crate::pipeline::CallContext;

pub const KIND: &str = "http.target";

const HEADER_PREFIX: &str = "header.";

#[must_use]
pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor::new(KIND)
        .name("HTTP")
        .description("Executes one outbound HTTP request per call")
        .category("Web")
        .provider("Builtin")
        .property(
            PropertySpec::new("default_url", PropertyKind::String)
                .description("URL used when a request carries none")
                .default_value(""),
        )
        .property(
            PropertySpec::new("timeout_ms", PropertyKind::Int)
                .description("Per-request timeout in milliseconds")
                .min(1)
                .default_value("30000"),
        )
        .metadata_field(
            MetadataFieldSpec::new("method", PropertyKind::String)
                .default_value("POST")
                .options(["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]),
        )
        .metadata_field(MetadataFieldSpec::new("url", PropertyKind::String))
}

/// Outbound HTTP backend.
pub struct HttpTarget {
    client: Option<reqwest::Client>,
    default_url: Option<String>,
}

impl HttpTarget {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            default_url: None,
        }
    }
}

impl Default for HttpTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Target for HttpTarget {
    async fn init(&mut self, cfg: &ConnectorConfig) -> anyhow::Result<()> {
        #[allow(clippy::cast_sign_loss)]
        let timeout = Duration::from_millis(
            cfg.get_i64_in("timeout_ms", 30_000, 1, i64::from(u32::MAX))? as u64,
        );
        let default_url = cfg.get_str("default_url", "");
        self.default_url = (!default_url.is_empty()).then(|| default_url.to_string());
        self.client = Some(
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("building http client")?,
        );
        Ok(())
    }

    async fn invoke(&self, ctx: &CallContext, request: &Request) -> anyhow::Result<Response> {
        let client = self
            .client
            .as_ref()
            .context("http target used before init")?;

        let method_raw = request.metadata.get_or("method", "POST");
        let method = reqwest::Method::from_bytes(method_raw.to_uppercase().as_bytes())
            .with_context(|| format!("invalid http method: {method_raw}"))?;
        let url = match request.metadata.get("url") {
            Some(url) => url,
            None => self
                .default_url
                .as_deref()
                .context("request has no url and no default_url is configured")?,
        };

        let mut outbound = client
            .request(method, url)
            .body(request.data.clone());
        for (key, value) in request.metadata.iter() {
            if let Some(name) = key.strip_prefix(HEADER_PREFIX) {
                outbound = outbound.header(name, value);
            }
        }

        let sent = tokio::select! {
            () = ctx.cancel.cancelled() => anyhow::bail!("http call cancelled"),
            sent = outbound.send() => sent.context("sending http request")?,
        };

        let status = sent.status();
        let body = sent.bytes().await.context("reading http response body")?;
        Ok(Response::new()
            .with_metadata("status_code", status.as_u16().to_string())
            .with_data(body))
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
