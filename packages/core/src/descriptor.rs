//! Connector descriptors: static self-description of a source/target kind.
//!
//! Each connector implementation publishes one [`ConnectorDescriptor`] at
//! registration time. The descriptor declares the configuration property
//! schema (validated against binding configuration before a connector is
//! initialized) and the per-request metadata fields (consumed by manifest
//! tooling, outside the runtime core).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Property schema
// ---------------------------------------------------------------------------

/// Value type of a configuration property or metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Int,
    Bool,
    /// Free-form multi-line text (scripts, certificates, JSON blobs).
    Multilines,
}

/// Schema of one configuration property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
    #[serde(default)]
    pub description: String,
    /// Whether the property must be present in binding configuration.
    #[serde(default)]
    pub required: bool,
    /// Default value, rendered as a string regardless of kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Inclusive lower bound for `Int` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Inclusive upper bound for `Int` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl PropertySpec {
    /// Creates a property spec with the given name and kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: false,
            default: None,
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: i64) -> Self {
        self.max = Some(max);
        self
    }

    /// Checks one concrete value against this spec's kind and bounds.
    fn check_value(&self, value: &str) -> Result<(), PropertyError> {
        match self.kind {
            PropertyKind::String | PropertyKind::Multilines => Ok(()),
            PropertyKind::Int => {
                let parsed: i64 = value.parse().map_err(|_| PropertyError::NotAnInt {
                    name: self.name.clone(),
                    value: value.to_string(),
                })?;
                if self.min.is_some_and(|min| parsed < min)
                    || self.max.is_some_and(|max| parsed > max)
                {
                    return Err(PropertyError::OutOfRange {
                        name: self.name.clone(),
                        value: parsed,
                        min: self.min,
                        max: self.max,
                    });
                }
                Ok(())
            }
            PropertyKind::Bool => {
                value.parse::<bool>().map_err(|_| PropertyError::NotABool {
                    name: self.name.clone(),
                    value: value.to_string(),
                })?;
                Ok(())
            }
        }
    }
}

/// Schema of one per-request metadata field, with an optional enumeration of
/// allowed values. Consumed by manifest tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFieldSpec {
    pub name: String,
    pub kind: PropertyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Allowed values; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl MetadataFieldSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// ConnectorDescriptor
// ---------------------------------------------------------------------------

/// Static metadata describing one connector kind.
///
/// Immutable after construction; created once per implementation at
/// registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    /// Unique kind identifier, e.g. `"echo.target"`.
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Configuration property schema.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertySpec>,
    /// Per-request metadata field schema.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataFieldSpec>,
}

impl ConnectorDescriptor {
    /// Creates a descriptor for the given kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: String::new(),
            description: String::new(),
            category: String::new(),
            provider: String::new(),
            tags: Vec::new(),
            properties: Vec::new(),
            metadata: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    #[must_use]
    pub fn metadata_field(mut self, spec: MetadataFieldSpec) -> Self {
        self.metadata.push(spec);
        self
    }

    /// Checks the descriptor for internal consistency: a non-empty kind,
    /// unique property names, and declared defaults that satisfy their own
    /// kind/bounds/options constraints.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.kind.is_empty() {
            return Err(DescriptorError::EmptyKind);
        }
        let mut seen = BTreeSet::new();
        for prop in &self.properties {
            if !seen.insert(prop.name.as_str()) {
                return Err(DescriptorError::DuplicateProperty {
                    kind: self.kind.clone(),
                    name: prop.name.clone(),
                });
            }
            if let Some(default) = &prop.default {
                // Empty string defaults stand for "unset" on optional
                // string properties, mirroring existing connector manifests.
                if default.is_empty() && prop.kind != PropertyKind::Int {
                    continue;
                }
                prop.check_value(default)
                    .map_err(|source| DescriptorError::InvalidDefault {
                        kind: self.kind.clone(),
                        source,
                    })?;
            }
        }
        for field in &self.metadata {
            if let (Some(default), false) = (&field.default, field.options.is_empty()) {
                if !field.options.contains(default) {
                    return Err(DescriptorError::DefaultNotAnOption {
                        kind: self.kind.clone(),
                        field: field.name.clone(),
                        value: default.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates a concrete property map against this descriptor's schema:
    /// every required property present, every provided value well-typed and
    /// within bounds.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate_properties(
        &self,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), PropertyError> {
        for spec in &self.properties {
            match properties.get(&spec.name) {
                Some(value) => spec.check_value(value)?,
                None if spec.required => {
                    return Err(PropertyError::MissingRequired {
                        name: spec.name.clone(),
                    })
                }
                None => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Violations of a concrete property map against a descriptor schema.
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("missing required property: {name}")]
    MissingRequired { name: String },
    #[error("property {name} is not an integer: {value}")]
    NotAnInt { name: String, value: String },
    #[error("property {name} is not a boolean: {value}")]
    NotABool { name: String, value: String },
    #[error("property {name} value {value} outside range [{min:?}, {max:?}]")]
    OutOfRange {
        name: String,
        value: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
}

/// Internal inconsistencies of a descriptor itself.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor has an empty kind")]
    EmptyKind,
    #[error("descriptor {kind} declares property {name} twice")]
    DuplicateProperty { kind: String, name: String },
    #[error("descriptor {kind} declares an invalid default: {source}")]
    InvalidDefault {
        kind: String,
        source: PropertyError,
    },
    #[error("descriptor {kind} metadata field {field} default {value} not in options")]
    DefaultNotAnOption {
        kind: String,
        field: String,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
