//! The binding fleet: start-or-nothing bring-up, best-effort teardown, and
//! full-replace reload.
//!
//! Readers (sources dispatching requests, the status API) never contend
//! with lifecycle operations: the live set sits in an `ArcSwap` snapshot,
//! while start/stop/reload serialize on one async mutex.

use std::sync::Arc;

use arc_swap::ArcSwap;
use qbridge_core::{Config, ConfigError};
use tokio::sync::Mutex;

use super::binder::{Binding, BindingError, BindingStatus, Side};
use crate::connector::registry::{SourceRegistry, TargetRegistry};
use crate::metrics::MetricsExporter;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A new configuration rejected before any running binding was touched.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("binding {binding}: unknown {side} kind: {kind}")]
    UnknownKind {
        binding: String,
        side: Side,
        kind: String,
    },
    #[error("binding {binding}: invalid properties for {side} kind {kind}: {source}")]
    Properties {
        binding: String,
        side: Side,
        kind: String,
        #[source]
        source: qbridge_core::PropertyError,
    },
}

/// Start failures: the configuration was rejected up front, or a binding
/// failed to come up (in which case everything already started by the call
/// was rolled back).
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Reload failures, split by blast radius: `Validation` left the old set
/// running untouched; `Start` means the old set is already gone and the new
/// one failed to come up.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("new configuration rejected, previous bindings kept running: {0}")]
    Validation(#[from] ValidationError),
    #[error("previous bindings stopped but new configuration failed to start: {0}")]
    Start(#[from] BindingError),
}

/// One binding that did not shut down cleanly.
#[derive(Debug)]
pub struct StopFailure {
    pub binding: String,
    pub error: anyhow::Error,
}

// ---------------------------------------------------------------------------
// BindingService
// ---------------------------------------------------------------------------

/// Owns the live binding set.
pub struct BindingService {
    sources: Arc<SourceRegistry>,
    targets: Arc<TargetRegistry>,
    exporter: Arc<dyn MetricsExporter>,
    active: ArcSwap<Vec<Arc<Binding>>>,
    lifecycle: Mutex<()>,
}

impl BindingService {
    #[must_use]
    pub fn new(
        sources: Arc<SourceRegistry>,
        targets: Arc<TargetRegistry>,
        exporter: Arc<dyn MetricsExporter>,
    ) -> Self {
        Self {
            sources,
            targets,
            exporter,
            active: ArcSwap::from_pointee(Vec::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Checks a configuration against the registries without touching any
    /// running binding: structural validity, known kinds, conforming
    /// properties.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self, cfg: &Config) -> Result<(), ValidationError> {
        cfg.validate()?;
        for binding in &cfg.bindings {
            let source_desc = self.sources.descriptor(&binding.source.kind).ok_or_else(|| {
                ValidationError::UnknownKind {
                    binding: binding.name.clone(),
                    side: Side::Source,
                    kind: binding.source.kind.clone(),
                }
            })?;
            let target_desc = self.targets.descriptor(&binding.target.kind).ok_or_else(|| {
                ValidationError::UnknownKind {
                    binding: binding.name.clone(),
                    side: Side::Target,
                    kind: binding.target.kind.clone(),
                }
            })?;
            source_desc
                .validate_properties(&binding.source.properties)
                .map_err(|source| ValidationError::Properties {
                    binding: binding.name.clone(),
                    side: Side::Source,
                    kind: binding.source.kind.clone(),
                    source,
                })?;
            target_desc
                .validate_properties(&binding.target.properties)
                .map_err(|source| ValidationError::Properties {
                    binding: binding.name.clone(),
                    side: Side::Target,
                    kind: binding.target.kind.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Starts every binding in the configuration, atomically: the
    /// configuration is validated first, and on the first bring-up failure
    /// every binding already started by this call is stopped again, so
    /// nothing remains running.
    ///
    /// # Errors
    ///
    /// Returns the rejection or the failure of the offending binding.
    pub async fn start(&self, cfg: &Config) -> Result<(), StartError> {
        let _guard = self.lifecycle.lock().await;
        self.validate(cfg)?;
        self.start_locked(cfg).await?;
        Ok(())
    }

    /// Stops every running binding, best-effort: all bindings are stopped
    /// even when some fail, and every failure is reported.
    pub async fn stop(&self) -> Vec<StopFailure> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// Replaces the entire running set with the new configuration.
    ///
    /// The new configuration is validated first; a rejection leaves the old
    /// set running untouched. Once the old set is stopped, a start failure
    /// is fatal to the service: nothing is left running.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::Validation`] or [`ReloadError::Start`]
    /// accordingly.
    pub async fn reload(&self, cfg: &Config) -> Result<(), ReloadError> {
        let _guard = self.lifecycle.lock().await;
        self.validate(cfg)?;

        let failures = self.stop_locked().await;
        for failure in &failures {
            tracing::warn!(
                binding = %failure.binding,
                error = %failure.error,
                "unclean shutdown during reload"
            );
        }
        self.start_locked(cfg).await?;
        tracing::info!(bindings = cfg.bindings.len(), "configuration reloaded");
        Ok(())
    }

    /// Point-in-time view of the running set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BindingStatus> {
        self.active.load().iter().map(|b| b.status()).collect()
    }

    async fn start_locked(&self, cfg: &Config) -> Result<(), BindingError> {
        let mut started: Vec<Arc<Binding>> = Vec::with_capacity(cfg.bindings.len());
        for binding_cfg in &cfg.bindings {
            match Binding::start(
                binding_cfg,
                &self.sources,
                &self.targets,
                self.exporter.clone(),
            )
            .await
            {
                Ok(binding) => started.push(binding),
                Err(error) => {
                    // Roll back: nothing from this call stays running.
                    for binding in started {
                        for failure in binding.stop().await {
                            tracing::warn!(
                                binding = binding.name(),
                                error = %failure,
                                "unclean rollback"
                            );
                        }
                    }
                    return Err(error);
                }
            }
        }
        self.active.store(Arc::new(started));
        Ok(())
    }

    async fn stop_locked(&self) -> Vec<StopFailure> {
        let previous = self.active.swap(Arc::new(Vec::new()));
        let mut failures = Vec::new();
        for binding in previous.iter() {
            for error in binding.stop().await {
                failures.push(StopFailure {
                    binding: binding.name().to_string(),
                    error,
                });
            }
        }
        failures
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
