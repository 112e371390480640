//! Binding configuration: the external document that names which bindings
//! run and how each pipeline is wrapped.
//!
//! Parsed from YAML. Structural validation lives here; schema validation
//! against connector descriptors happens in the runtime, where the registry
//! knows which kinds exist.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConnectorConfig
// ---------------------------------------------------------------------------

/// Configuration of one connector instance: its kind plus the flat property
/// map validated against the kind's descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Registry kind selecting the implementation, e.g. `"echo.target"`.
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ConnectorConfig {
    /// Creates a config for the given kind with no properties.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property insert.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the property value, or `default` if absent.
    #[must_use]
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.properties.get(key).map_or(default, String::as_str)
    }

    /// Returns the property value; errors if absent or empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingProperty`] when the key is unset.
    pub fn must_str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.properties.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ConfigError::MissingProperty {
                kind: self.kind.clone(),
                key: key.to_string(),
            }),
        }
    }

    /// Parses an integer property within `[min, max]`, falling back to
    /// `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProperty`] on parse failure or when the
    /// value falls outside the range.
    pub fn get_i64_in(&self, key: &str, default: i64, min: i64, max: i64) -> Result<i64, ConfigError> {
        let Some(raw) = self.properties.get(key) else {
            return Ok(default);
        };
        let value: i64 = raw.parse().map_err(|_| ConfigError::InvalidProperty {
            kind: self.kind.clone(),
            key: key.to_string(),
            reason: format!("not an integer: {raw}"),
        })?;
        if value < min || value > max {
            return Err(ConfigError::InvalidProperty {
                kind: self.kind.clone(),
                key: key.to_string(),
                reason: format!("{value} outside range [{min}, {max}]"),
            });
        }
        Ok(value)
    }

    /// Parses a boolean property, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProperty`] on parse failure.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.properties.get(key) else {
            return Ok(default);
        };
        raw.parse().map_err(|_| ConfigError::InvalidProperty {
            kind: self.kind.clone(),
            key: key.to_string(),
            reason: format!("not a boolean: {raw}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Middleware configuration
// ---------------------------------------------------------------------------

/// Verbosity of the pipeline logging stage. A process-lifetime value per
/// binding; it changes observability output, never control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Full request/response bodies and metadata.
    Debug,
    /// Metadata plus success/failure outcome.
    #[default]
    Info,
    /// Failures only.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => f.write_str("debug"),
            Self::Info => f.write_str("info"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Retry stage parameters. `attempts == 0` means a single unretried attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 and 1 both mean no retries).
    pub attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub delay_ms: u64,
    /// Exponential backoff multiplier applied per retry.
    pub backoff_factor: f64,
    /// Cap on any single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Cross-cutting pipeline configuration for one binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub log_level: LogLevel,
    /// Steady-state rate cap in requests per second; 0 disables throttling.
    pub rate_per_second: u32,
    pub retry: RetryConfig,
}

// ---------------------------------------------------------------------------
// BindingConfig / Config
// ---------------------------------------------------------------------------

/// One named source/target pairing plus its middleware configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub name: String,
    pub source: ConnectorConfig,
    pub target: ConnectorConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

/// The full configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port for the status/metrics API; 0 disables the API server.
    #[serde(default)]
    pub api_port: u16,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl Config {
    /// Parses a configuration document from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Structural validation: at least one binding, unique non-empty binding
    /// names, non-empty kinds, and sane retry numbers.
    ///
    /// # Errors
    ///
    /// Returns the first structural violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bindings.is_empty() {
            return Err(ConfigError::NoBindings);
        }
        let mut names = BTreeSet::new();
        for binding in &self.bindings {
            if binding.name.is_empty() {
                return Err(ConfigError::UnnamedBinding);
            }
            if !names.insert(binding.name.as_str()) {
                return Err(ConfigError::DuplicateBinding {
                    name: binding.name.clone(),
                });
            }
            if binding.source.kind.is_empty() || binding.target.kind.is_empty() {
                return Err(ConfigError::MissingKind {
                    binding: binding.name.clone(),
                });
            }
            let retry = &binding.middleware.retry;
            if retry.backoff_factor < 1.0 {
                return Err(ConfigError::InvalidRetry {
                    binding: binding.name.clone(),
                    reason: format!("backoff_factor {} must be >= 1", retry.backoff_factor),
                });
            }
            if retry.max_delay_ms > 0 && retry.max_delay_ms < retry.delay_ms {
                return Err(ConfigError::InvalidRetry {
                    binding: binding.name.clone(),
                    reason: format!(
                        "max_delay_ms {} below delay_ms {}",
                        retry.max_delay_ms, retry.delay_ms
                    ),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration errors: fail fast at start/reload time, never partially
/// applied.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("configuration declares no bindings")]
    NoBindings,
    #[error("binding with empty name")]
    UnnamedBinding,
    #[error("duplicate binding name: {name}")]
    DuplicateBinding { name: String },
    #[error("binding {binding} is missing a source or target kind")]
    MissingKind { binding: String },
    #[error("binding {binding} has invalid retry configuration: {reason}")]
    InvalidRetry { binding: String, reason: String },
    #[error("connector {kind} is missing required property {key}")]
    MissingProperty { kind: String, key: String },
    #[error("connector {kind} property {key} invalid: {reason}")]
    InvalidProperty {
        kind: String,
        key: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
api_port: 8080
bindings:
  - name: orders-to-store
    source:
      kind: echo.source
      properties:
        data: ping
    target:
      kind: echo.target
    middleware:
      log_level: debug
      rate_per_second: 100
      retry:
        attempts: 3
        delay_ms: 50
        backoff_factor: 2.0
        max_delay_ms: 1000
";

    #[test]
    fn parses_sample_document() {
        let cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.api_port, 8080);
        assert_eq!(cfg.bindings.len(), 1);
        let binding = &cfg.bindings[0];
        assert_eq!(binding.name, "orders-to-store");
        assert_eq!(binding.source.kind, "echo.source");
        assert_eq!(binding.source.get_str("data", ""), "ping");
        assert_eq!(binding.middleware.log_level, LogLevel::Debug);
        assert_eq!(binding.middleware.rate_per_second, 100);
        assert_eq!(binding.middleware.retry.attempts, 3);
    }

    #[test]
    fn middleware_defaults_apply_when_omitted() {
        let cfg = Config::from_yaml(
            r"
bindings:
  - name: bare
    source: { kind: echo.source }
    target: { kind: echo.target }
",
        )
        .unwrap();
        cfg.validate().unwrap();
        let mw = &cfg.bindings[0].middleware;
        assert_eq!(mw.log_level, LogLevel::Info);
        assert_eq!(mw.rate_per_second, 0);
        assert_eq!(mw.retry, RetryConfig::default());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            Config::from_yaml("bindings: ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn duplicate_binding_names_rejected() {
        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        let dup = cfg.bindings[0].clone();
        cfg.bindings.push(dup);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn empty_kind_rejected() {
        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.bindings[0].target.kind.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingKind { .. })));
    }

    #[test]
    fn sub_one_backoff_rejected() {
        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.bindings[0].middleware.retry.backoff_factor = 0.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidRetry { .. })
        ));
    }

    #[test]
    fn typed_getters() {
        let cfg = ConnectorConfig::new("stores.example")
            .with_property("port", "5432")
            .with_property("use_tls", "true")
            .with_property("host", "db.local");
        assert_eq!(cfg.must_str("host").unwrap(), "db.local");
        assert!(cfg.must_str("missing").is_err());
        assert_eq!(cfg.get_i64_in("port", 0, 0, 65_535).unwrap(), 5432);
        assert_eq!(cfg.get_i64_in("absent", 7, 0, 100).unwrap(), 7);
        assert!(cfg.get_i64_in("port", 0, 0, 100).is_err());
        assert!(cfg.get_bool("use_tls", false).unwrap());
        assert!(!cfg.get_bool("absent", false).unwrap());
    }
}
