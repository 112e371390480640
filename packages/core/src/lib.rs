//! `qbridge` core — request/response envelope, connector descriptors, and
//! binding configuration.
//!
//! This crate is pure data + validation: no async runtime, no I/O. The
//! runtime crate (`qbridge-runtime`) builds the registry, middleware
//! pipeline, and binding orchestrator on top of these types.

pub mod config;
pub mod descriptor;
pub mod envelope;

pub use config::{
    BindingConfig, Config, ConfigError, ConnectorConfig, LogLevel, MiddlewareConfig, RetryConfig,
};
pub use descriptor::{
    ConnectorDescriptor, DescriptorError, MetadataFieldSpec, PropertyError, PropertyKind,
    PropertySpec,
};
pub use envelope::{Metadata, Request, Response};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
