//! One binding: an initialized source feeding the middleware pipeline around
//! an initialized target.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use qbridge_core::BindingConfig;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::connector::registry::{RegistryError, SourceRegistry, TargetRegistry};
use crate::connector::{Source, Target};
use crate::metrics::MetricsExporter;
use crate::pipeline::build_pipeline;

// ---------------------------------------------------------------------------
// BindingState
// ---------------------------------------------------------------------------

/// Lifecycle of one binding. Transitions are one-way; a stopped binding is
/// never restarted, reload builds a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingState {
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initializing => f.write_str("initializing"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Which half of a binding an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// Failures while bringing one binding up. Every variant names the binding
/// and the offending side/kind so start errors are actionable from the log
/// alone.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("binding {binding}: {side} kind rejected: {source}")]
    Kind {
        binding: String,
        side: Side,
        #[source]
        source: RegistryError,
    },
    #[error("binding {binding}: invalid properties for {side} kind {kind}: {source}")]
    Properties {
        binding: String,
        side: Side,
        kind: String,
        #[source]
        source: qbridge_core::PropertyError,
    },
    #[error("binding {binding}: {side} {kind} failed to initialize: {source}")]
    Init {
        binding: String,
        side: Side,
        kind: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("binding {binding}: source {kind} failed to start: {source}")]
    SourceStart {
        binding: String,
        kind: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Point-in-time view of one binding, served by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct BindingStatus {
    pub name: String,
    pub source_kind: String,
    pub target_kind: String,
    pub state: BindingState,
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// One running source→pipeline→target unit.
pub struct Binding {
    name: Arc<str>,
    source_kind: String,
    target_kind: String,
    source: Box<dyn Source>,
    target: Arc<dyn Target>,
    cancel: CancellationToken,
    state: ArcSwap<BindingState>,
}

impl Binding {
    /// Brings one binding fully up: validates properties against both
    /// descriptors, creates and initializes the target, wraps it in the
    /// middleware pipeline, then creates, initializes, and starts the
    /// source with the pipeline as its dispatch handle.
    ///
    /// On any failure, everything already initialized is torn down again
    /// before the error is returned; a failed start leaks nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`BindingError`] naming the binding and the failing
    /// side/kind.
    pub async fn start(
        cfg: &BindingConfig,
        sources: &SourceRegistry,
        targets: &TargetRegistry,
        exporter: Arc<dyn MetricsExporter>,
    ) -> Result<Arc<Self>, BindingError> {
        let name = cfg.name.as_str();
        let kind_err = |side: Side| {
            let binding = name.to_string();
            move |source: RegistryError| BindingError::Kind {
                binding,
                side,
                source,
            }
        };

        let target_desc = targets
            .descriptor(&cfg.target.kind)
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: cfg.target.kind.clone(),
            })
            .map_err(kind_err(Side::Target))?;
        let source_desc = sources
            .descriptor(&cfg.source.kind)
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: cfg.source.kind.clone(),
            })
            .map_err(kind_err(Side::Source))?;

        target_desc
            .validate_properties(&cfg.target.properties)
            .map_err(|source| BindingError::Properties {
                binding: name.to_string(),
                side: Side::Target,
                kind: cfg.target.kind.clone(),
                source,
            })?;
        source_desc
            .validate_properties(&cfg.source.properties)
            .map_err(|source| BindingError::Properties {
                binding: name.to_string(),
                side: Side::Source,
                kind: cfg.source.kind.clone(),
                source,
            })?;

        let mut target = targets
            .create(&cfg.target.kind)
            .map_err(kind_err(Side::Target))?;
        if let Err(error) = target.init(&cfg.target).await {
            teardown(name, Side::Target, &cfg.target.kind, target.stop().await);
            return Err(BindingError::Init {
                binding: name.to_string(),
                side: Side::Target,
                kind: cfg.target.kind.clone(),
                source: error,
            });
        }
        let target: Arc<dyn Target> = Arc::from(target);

        let binding_name: Arc<str> = Arc::from(name);
        let cancel = CancellationToken::new();
        let pipeline = build_pipeline(
            binding_name.clone(),
            &cfg.source.kind,
            &cfg.target.kind,
            &cfg.middleware,
            target.clone(),
            exporter,
            cancel.clone(),
        );

        let mut source = sources
            .create(&cfg.source.kind)
            .map_err(kind_err(Side::Source))?;
        if let Err(error) = source.init(&cfg.source).await {
            teardown(name, Side::Source, &cfg.source.kind, source.stop().await);
            teardown(name, Side::Target, &cfg.target.kind, target.stop().await);
            return Err(BindingError::Init {
                binding: name.to_string(),
                side: Side::Source,
                kind: cfg.source.kind.clone(),
                source: error,
            });
        }

        let binding = Self {
            name: binding_name,
            source_kind: cfg.source.kind.clone(),
            target_kind: cfg.target.kind.clone(),
            source,
            target,
            cancel,
            state: ArcSwap::from_pointee(BindingState::Initializing),
        };

        if let Err(error) = binding.source.start(Arc::new(pipeline)).await {
            let failures = binding.stop().await;
            for failure in failures {
                tracing::warn!(binding = name, error = %failure, "teardown after failed start");
            }
            return Err(BindingError::SourceStart {
                binding: name.to_string(),
                kind: cfg.source.kind.clone(),
                source: error,
            });
        }

        binding.state.store(Arc::new(BindingState::Running));
        tracing::info!(
            binding = name,
            source = %binding.source_kind,
            target = %binding.target_kind,
            "binding started"
        );
        Ok(Arc::new(binding))
    }

    /// Stops the binding: cancels in-flight calls, then stops source and
    /// target. Best-effort; both halves are stopped even when one fails, and
    /// every failure is returned.
    pub async fn stop(&self) -> Vec<anyhow::Error> {
        self.state.store(Arc::new(BindingState::Stopping));
        self.cancel.cancel();

        let mut failures = Vec::new();
        if let Err(error) = self.source.stop().await {
            failures.push(error.context(format!("stopping source {}", self.source_kind)));
        }
        if let Err(error) = self.target.stop().await {
            failures.push(error.context(format!("stopping target {}", self.target_kind)));
        }

        self.state.store(Arc::new(BindingState::Stopped));
        tracing::info!(binding = %self.name, failures = failures.len(), "binding stopped");
        failures
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> BindingState {
        **self.state.load()
    }

    /// Point-in-time view for the status API.
    #[must_use]
    pub fn status(&self) -> BindingStatus {
        BindingStatus {
            name: self.name.to_string(),
            source_kind: self.source_kind.clone(),
            target_kind: self.target_kind.clone(),
            state: self.state(),
        }
    }
}

fn teardown(binding: &str, side: Side, kind: &str, result: anyhow::Result<()>) {
    if let Err(error) = result {
        tracing::warn!(binding, %side, kind, %error, "teardown after failed init");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use qbridge_core::{ConnectorConfig, Request};

    use super::*;
    use crate::connector::registry::{default_source_registry, default_target_registry};
    use crate::connector::sources::channel::ChannelSource;
    use crate::metrics::RuntimeExporter;

    fn echo_binding(name: &str) -> BindingConfig {
        BindingConfig {
            name: name.to_string(),
            source: ConnectorConfig::new("channel.source"),
            target: ConnectorConfig::new("echo.target"),
            middleware: qbridge_core::MiddlewareConfig::default(),
        }
    }

    fn channel_registry() -> (Arc<SourceRegistry>, crate::connector::sources::channel::ChannelClient)
    {
        let registry = SourceRegistry::new();
        let (source, client) = ChannelSource::pair();
        let slot = parking_lot::Mutex::new(Some(source));
        registry
            .register(
                crate::connector::sources::channel::descriptor(),
                Box::new(move || {
                    Box::new(
                        slot.lock()
                            .take()
                            .unwrap_or_else(|| ChannelSource::pair().0),
                    )
                }),
            )
            .unwrap();
        (Arc::new(registry), client)
    }

    #[tokio::test]
    async fn starts_runs_and_stops_a_binding() {
        let (sources, client) = channel_registry();
        let targets = default_target_registry();

        let binding = Binding::start(
            &echo_binding("orders"),
            &sources,
            &targets,
            Arc::new(RuntimeExporter),
        )
        .await
        .unwrap();
        assert_eq!(binding.state(), BindingState::Running);

        let response = client
            .request(Request::new().with_data("payload"))
            .await
            .unwrap();
        assert_eq!(response.data, "payload");

        let failures = binding.stop().await;
        assert!(failures.is_empty());
        assert_eq!(binding.state(), BindingState::Stopped);
    }

    #[tokio::test]
    async fn unknown_target_kind_fails_with_the_binding_named() {
        let sources = default_source_registry();
        let targets = default_target_registry();
        let mut cfg = echo_binding("orders");
        cfg.source = ConnectorConfig::new("echo.source");
        cfg.target = ConnectorConfig::new("mystery.target");

        let err = Binding::start(&cfg, &sources, &targets, Arc::new(RuntimeExporter))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BindingError::Kind {
                side: Side::Target,
                ..
            }
        ));
        assert!(err.to_string().contains("orders"));
    }

    #[tokio::test]
    async fn invalid_properties_are_caught_before_init() {
        let sources = default_source_registry();
        let targets = default_target_registry();
        let mut cfg = echo_binding("orders");
        cfg.source = ConnectorConfig::new("echo.source").with_property("count", "many");
        cfg.target = ConnectorConfig::new("echo.target");

        let err = Binding::start(&cfg, &sources, &targets, Arc::new(RuntimeExporter))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BindingError::Properties {
                side: Side::Source,
                ..
            }
        ));
    }
}
