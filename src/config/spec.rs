//! Manifest types.
//!
//! This module defines the structs that map to `ipfs-deploy.yaml`. A manifest
//! declares the stack identity, where state lives, which provider to talk to,
//! named config options, resources, and stack outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

use crate::error::ConfigError;
use crate::provider::RetryPolicy;
use crate::resource::{Property, ResourceDescriptor, ResourceKind};

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Stack identity.
    #[validate(nested)]
    pub stack: StackConfig,
    /// State backend configuration.
    #[serde(default)]
    #[validate(nested)]
    pub state: StateConfig,
    /// Provider configuration.
    #[serde(default)]
    #[validate(nested)]
    pub provider: ProviderConfig,
    /// Declared config options.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigOption>,
    /// Values for config options, overriding their defaults.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    /// Resource declarations.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Stack outputs, as property expressions.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

/// Stack identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Stack name.
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    /// Environment (e.g. "dev", "prod").
    #[serde(default = "default_environment")]
    #[validate(length(min = 1, max = 32))]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region; the AWS default chain applies when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory, relative to the manifest.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Which adapter to use.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the cloud API (required for the http adapter).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Cloud region passed through to the provider.
    #[serde(default)]
    pub region: Option<String>,
    /// Maximum operations in flight.
    #[serde(default)]
    #[validate(range(min = 1, max = 256))]
    pub parallelism: Option<usize>,
    /// Stop scheduling new operations after this many seconds.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub timeout_secs: Option<u64>,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
}

/// Provider adapters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process cloud.
    #[default]
    Simulated,
    /// REST cloud endpoint.
    Http,
}

/// Retry settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per provider call.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    /// First backoff delay.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// A named config option.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigOption {
    /// Value used when nothing else sets the option; null when absent.
    #[serde(default)]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// One resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Input properties, possibly containing expressions.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Explicit ordering dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_max_attempts() -> u32 {
    crate::provider::DEFAULT_MAX_ATTEMPTS
}

const fn default_base_delay_ms() -> u64 {
    crate::provider::DEFAULT_BASE_DELAY_MS
}

const fn default_max_delay_ms() -> u64 {
    crate::provider::DEFAULT_MAX_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Converts to the provider retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl ResourceSpec {
    /// Builds a descriptor with `$config` expressions bound to `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if a property expression is malformed or names an
    /// undeclared option.
    pub fn descriptor(&self, options: &BTreeMap<String, Value>) -> Result<ResourceDescriptor, ConfigError> {
        let mut descriptor = ResourceDescriptor::new(self.name.clone(), self.kind);
        for (key, raw) in &self.properties {
            let path = format!("resources.{}.properties.{key}", self.name);
            let property = Property::parse(raw, &path)?.bind_config(options)?;
            descriptor = descriptor.with_property(key.clone(), property);
        }
        for dependency in &self.depends_on {
            descriptor = descriptor.with_dependency(dependency.clone());
        }
        Ok(descriptor)
    }
}

impl Manifest {
    /// Builds every resource descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first expression or binding error.
    pub fn descriptors(&self, options: &BTreeMap<String, Value>) -> Result<Vec<ResourceDescriptor>, ConfigError> {
        self.resources.iter().map(|r| r.descriptor(options)).collect()
    }

    /// Parses and binds stack output expressions.
    ///
    /// # Errors
    ///
    /// Returns the first expression or binding error.
    pub fn output_properties(
        &self,
        options: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Property>, ConfigError> {
        self.outputs
            .iter()
            .map(|(name, raw)| {
                let property = Property::parse(raw, &format!("outputs.{name}"))?.bind_config(options)?;
                Ok((name.clone(), property))
            })
            .collect()
    }

    /// Returns resource names in declaration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Finds a resource declaration by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_config_defaults_match_policy_defaults() {
        assert_eq!(RetryConfig::default().policy(), RetryPolicy::default());
    }

    #[test]
    fn test_descriptor_binds_config_options() {
        let spec = ResourceSpec {
            name: String::from("subnet"),
            kind: ResourceKind::Subnet,
            properties: BTreeMap::from([
                (String::from("vpc_id"), json!({ "$ref": "vpc.id" })),
                (String::from("cidr_block"), json!("10.0.1.0/24")),
                (
                    String::from("availability_zone"),
                    json!({ "$concat": [{ "$config": "region" }, "a"] }),
                ),
            ]),
            depends_on: vec![String::from("igw")],
        };
        let options = BTreeMap::from([(String::from("region"), json!("eu-west-1"))]);

        let descriptor = spec.descriptor(&options).unwrap();
        assert_eq!(
            descriptor.properties["availability_zone"],
            Property::Resolved(json!("eu-west-1a"))
        );
        assert_eq!(descriptor.properties["vpc_id"], Property::reference("vpc", "id"));
        assert_eq!(descriptor.depends_on, vec![String::from("igw")]);
    }

    #[test]
    fn test_descriptor_rejects_undeclared_option() {
        let spec = ResourceSpec {
            name: String::from("vpc"),
            kind: ResourceKind::Vpc,
            properties: BTreeMap::from([(String::from("cidr_block"), json!({ "$config": "cidr" }))]),
            depends_on: Vec::new(),
        };
        assert!(matches!(
            spec.descriptor(&BTreeMap::new()),
            Err(ConfigError::UnknownOption { .. })
        ));
    }
}
