//! Kind registry: maps a connector kind string to a factory plus its
//! descriptor.
//!
//! This replaces type dispatch over kind strings with data: the orchestrator
//! stays ignorant of concrete backend types. The registry is populated once
//! at process initialization and read concurrently afterwards, so it is
//! backed by `DashMap` and exposes only `&self` methods.

use std::sync::Arc;

use dashmap::DashMap;
use qbridge_core::{ConnectorDescriptor, DescriptorError};

use super::{sources, targets, Source, Target};

/// Constructor for a fresh, uninitialized connector instance.
pub type Factory<C> = Box<dyn Fn() -> Box<C> + Send + Sync>;

/// Registry of source connector kinds.
pub type SourceRegistry = Registry<dyn Source>;
/// Registry of target connector kinds.
pub type TargetRegistry = Registry<dyn Target>;

struct Entry<C: ?Sized> {
    descriptor: ConnectorDescriptor,
    factory: Factory<C>,
}

/// Maps kind strings to factories, generic over the connector contract
/// (`dyn Source` or `dyn Target`).
pub struct Registry<C: ?Sized> {
    entries: DashMap<String, Entry<C>>,
}

impl<C: ?Sized> Registry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Associates the descriptor's kind with a factory.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateKind`] if the kind is already
    /// registered. The kind set is fixed at build time, so a duplicate is a
    /// programming error surfaced at process initialization.
    pub fn register(
        &self,
        descriptor: ConnectorDescriptor,
        factory: Factory<C>,
    ) -> Result<(), RegistryError> {
        let kind = descriptor.kind.clone();
        match self.entries.entry(kind.clone()) {
            dashmap::Entry::Occupied(_) => Err(RegistryError::DuplicateKind { kind }),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    descriptor,
                    factory,
                });
                Ok(())
            }
        }
    }

    /// Produces a fresh, uninitialized instance of the given kind. The
    /// caller validates properties against the descriptor and calls `init`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`] if the kind is absent.
    pub fn create(&self, kind: &str) -> Result<Box<C>, RegistryError> {
        let entry = self
            .entries
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: kind.to_string(),
            })?;
        Ok((entry.factory)())
    }

    /// Returns the descriptor for the given kind, if registered.
    #[must_use]
    pub fn descriptor(&self, kind: &str) -> Option<ConnectorDescriptor> {
        self.entries.get(kind).map(|entry| entry.descriptor.clone())
    }

    /// All registered descriptors, sorted by kind for stable manifest output.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ConnectorDescriptor> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.kind.cmp(&b.kind));
        all
    }

    /// Runs every registered descriptor's internal-consistency check.
    /// Duplicate kinds are impossible by construction; this catches schema
    /// defects like defaults outside declared bounds.
    ///
    /// # Errors
    ///
    /// Returns the first invalid descriptor found.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for entry in &self.entries {
            entry
                .descriptor
                .validate()
                .map_err(|source| RegistryError::InvalidDescriptor {
                    kind: entry.descriptor.kind.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl<C: ?Sized> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connector kind already registered: {kind}")]
    DuplicateKind { kind: String },
    #[error("unknown connector kind: {kind}")]
    UnknownKind { kind: String },
    #[error("invalid descriptor for kind {kind}: {source}")]
    InvalidDescriptor {
        kind: String,
        source: DescriptorError,
    },
}

/// Builds the source registry with all builtin kinds registered.
///
/// # Panics
///
/// Panics on duplicate builtin kinds, which would be a programming error
/// caught the first time the process starts.
#[must_use]
pub fn default_source_registry() -> Arc<SourceRegistry> {
    let registry = SourceRegistry::new();
    registry
        .register(
            sources::echo::descriptor(),
            Box::new(|| Box::new(sources::echo::EchoSource::new())),
        )
        .expect("builtin source kinds are unique");
    Arc::new(registry)
}

/// Builds the target registry with all builtin kinds registered.
///
/// # Panics
///
/// Panics on duplicate builtin kinds, which would be a programming error
/// caught the first time the process starts.
#[must_use]
pub fn default_target_registry() -> Arc<TargetRegistry> {
    let registry = TargetRegistry::new();
    registry
        .register(
            targets::echo::descriptor(),
            Box::new(|| Box::new(targets::echo::EchoTarget::new())),
        )
        .expect("builtin target kinds are unique");
    registry
        .register(
            targets::http::descriptor(),
            Box::new(|| Box::new(targets::http::HttpTarget::new())),
        )
        .expect("builtin target kinds are unique");
    Arc::new(registry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
