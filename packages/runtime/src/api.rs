//! Status API: health, readiness, per-binding state, and prometheus render.
//!
//! The server is tied to `Config::api_port`, so a reload that changes the
//! port stops this instance and starts a fresh one.

use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use crate::binding::{BindingService, BindingState};

#[derive(Clone)]
struct AppState {
    service: Arc<BindingService>,
    prometheus: Option<PrometheusHandle>,
}

/// A running status API server.
pub struct ApiServer {
    port: u16,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ApiServer {
    /// Binds the listener and starts serving. Port 0 binds an ephemeral
    /// port; `port()` reports the actual one.
    ///
    /// # Errors
    ///
    /// Fails when the port cannot be bound.
    pub async fn start(
        port: u16,
        service: Arc<BindingService>,
        prometheus: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding status api port {port}"))?;
        let port = listener.local_addr().context("resolving bound port")?.port();

        let router = Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/bindings", get(bindings))
            .route("/metrics", get(metrics))
            .with_state(AppState {
                service,
                prometheus,
            });

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(error) = served {
                tracing::error!(%error, "status api server failed");
            }
        });

        tracing::info!(port, "status api listening");
        Ok(Self { port, cancel, task })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully shuts the server down and waits for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.service.snapshot();
    let all_running = snapshot.iter().all(|b| b.state == BindingState::Running);
    if all_running {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn bindings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.snapshot())
}

async fn metrics(State(state): State<AppState>) -> axum::response::Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
