//! The process control loop: reload on configuration change, tear down on
//! termination signals.
//!
//! One loop owns both concerns so only one reconciliation runs at a time.
//! A rejected configuration is logged and the previous set keeps running; a
//! start failure after the previous set is already stopped is fatal, since
//! nothing is serving traffic anymore.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use qbridge_core::Config;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ApiServer;
use crate::binding::{BindingError, BindingService, ReloadError, StopFailure};

/// Runs until a termination signal (SIGTERM/SIGINT/SIGQUIT) arrives or a
/// reload leaves the service unable to start, then tears everything down.
///
/// # Errors
///
/// Returns the fatal start failure of a reload whose new configuration
/// could not be brought up after the old set was stopped.
pub async fn run(
    service: Arc<BindingService>,
    config_rx: mpsc::Receiver<Config>,
    api: Option<ApiServer>,
    prometheus: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;
    run_inner(service, config_rx, api, prometheus, shutdown).await
}

fn spawn_signal_listener(shutdown: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
            _ = interrupt.recv() => tracing::info!("received SIGINT"),
            _ = quit.recv() => tracing::info!("received SIGQUIT"),
        }
        shutdown.cancel();
    });
    Ok(())
}

async fn run_inner(
    service: Arc<BindingService>,
    mut config_rx: mpsc::Receiver<Config>,
    mut api: Option<ApiServer>,
    prometheus: Option<PrometheusHandle>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut config_open = true;
    let mut fatal: Option<BindingError> = None;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("shutting down");
                break;
            }
            changed = config_rx.recv(), if config_open => {
                let Some(config) = changed else {
                    // Watcher gone; keep serving and wait for a signal.
                    config_open = false;
                    continue;
                };
                match service.reload(&config).await {
                    Ok(()) => {
                        api = reconcile_api(api, &config, &service, prometheus.as_ref()).await;
                    }
                    Err(ReloadError::Validation(error)) => {
                        tracing::error!(%error, "reload rejected, previous bindings kept");
                    }
                    Err(ReloadError::Start(error)) => {
                        tracing::error!(%error, "reload failed with previous bindings stopped");
                        fatal = Some(error);
                        break;
                    }
                }
            }
        }
    }

    if let Some(server) = api.take() {
        server.stop().await;
    }
    log_stop_failures(&service.stop().await);

    match fatal {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

/// Restarts the status API when a reload moved (or removed) its port.
async fn reconcile_api(
    api: Option<ApiServer>,
    config: &Config,
    service: &Arc<BindingService>,
    prometheus: Option<&PrometheusHandle>,
) -> Option<ApiServer> {
    let desired = (config.api_port > 0).then_some(config.api_port);
    let current = api.as_ref().map(ApiServer::port);
    if desired == current {
        return api;
    }
    if let Some(server) = api {
        server.stop().await;
    }
    let port = desired?;
    match ApiServer::start(port, service.clone(), prometheus.cloned()).await {
        Ok(server) => Some(server),
        Err(error) => {
            // Bindings keep serving; the status surface is degraded only.
            tracing::error!(%error, port, "failed to restart status api");
            None
        }
    }
}

fn log_stop_failures(failures: &[StopFailure]) {
    for failure in failures {
        tracing::warn!(
            binding = %failure.binding,
            error = %failure.error,
            "unclean shutdown"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
