//! `qbridge` — message-driven integration bridge.
//!
//! Loads the binding configuration, brings the fleet up, serves the status
//! API, and runs the reload/shutdown loop until terminated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use qbridge_runtime::api::ApiServer;
use qbridge_runtime::binding::BindingService;
use qbridge_runtime::connector::registry::{default_source_registry, default_target_registry};
use qbridge_runtime::metrics::RuntimeExporter;
use qbridge_runtime::reload;
use qbridge_runtime::settings::{self, ConfigWatcher};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "qbridge", version, about = "Message-driven integration bridge")]
struct Args {
    /// Path to the binding configuration file.
    #[arg(long, default_value = "config.yaml", env = "QBRIDGE_CONFIG")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Print the connector manifest as JSON and exit.
    #[arg(long)]
    manifest: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let sources = default_source_registry();
    let targets = default_target_registry();
    sources.validate().context("source registry")?;
    targets.validate().context("target registry")?;

    if args.manifest {
        let manifest = serde_json::json!({
            "sources": sources.descriptors(),
            "targets": targets.descriptors(),
        });
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    let config = settings::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;

    let service = Arc::new(BindingService::new(
        sources,
        targets,
        Arc::new(RuntimeExporter),
    ));
    service.validate(&config)?;
    if args.validate {
        println!(
            "configuration ok: {} binding(s), api_port {}",
            config.bindings.len(),
            config.api_port
        );
        return Ok(());
    }

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;

    service.start(&config).await?;

    let api = if config.api_port > 0 {
        Some(ApiServer::start(config.api_port, service.clone(), Some(prometheus.clone())).await?)
    } else {
        None
    };

    let (config_tx, config_rx) = mpsc::channel(4);
    let watcher = ConfigWatcher::spawn(args.config.clone(), config_tx, CONFIG_POLL_INTERVAL);

    let result = reload::run(service, config_rx, api, Some(prometheus)).await;
    watcher.stop();
    result
}
