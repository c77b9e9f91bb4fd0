//! Manifest validation.
//!
//! Field-level rules are declared on the manifest types with the `validator`
//! derive; this module runs them and adds the cross-field checks that cannot
//! be expressed as attributes.

use std::collections::HashSet;
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{ConfigError, DeployError, Result};

use super::spec::{Manifest, ProviderKind, StateBackend};

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if let Some(first_error) = result.errors.first() {
            return Err(DeployError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }
        debug!("Manifest validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = manifest.validate() {
            collect_field_errors("", &errors, &mut result);
            result.errors.sort_by(|a, b| a.field.cmp(&b.field));
        }

        Self::validate_stack(manifest, &mut result);
        Self::validate_state(manifest, &mut result);
        Self::validate_provider(manifest, &mut result);
        Self::validate_options(manifest, &mut result);
        Self::validate_resources(manifest, &mut result);
        Self::validate_outputs(manifest, &mut result);
        result
    }

    fn validate_stack(manifest: &Manifest, result: &mut ValidationResult) {
        if !manifest.stack.name.is_empty() && !is_valid_name(&manifest.stack.name) {
            result.errors.push(ValidationError {
                field: String::from("stack.name"),
                message: format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    manifest.stack.name
                ),
            });
        }
    }

    fn validate_state(manifest: &Manifest, result: &mut ValidationResult) {
        let state = &manifest.state;
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
                if state.path.is_some() {
                    result
                        .warnings
                        .push(String::from("state.path is ignored by the s3 backend"));
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    fn validate_provider(manifest: &Manifest, result: &mut ValidationResult) {
        let provider = &manifest.provider;
        match (provider.kind, provider.endpoint.as_deref()) {
            (ProviderKind::Http, None | Some("")) => result.errors.push(ValidationError {
                field: String::from("provider.endpoint"),
                message: String::from("An endpoint is required for the http provider"),
            }),
            (ProviderKind::Http, Some(endpoint))
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
            {
                result.errors.push(ValidationError {
                    field: String::from("provider.endpoint"),
                    message: format!("Endpoint '{endpoint}' must be an http(s) URL"),
                });
            }
            (ProviderKind::Simulated, Some(_)) => result
                .warnings
                .push(String::from("provider.endpoint is ignored by the simulated provider")),
            _ => {}
        }

        if provider.retry.base_delay_ms > provider.retry.max_delay_ms {
            result.errors.push(ValidationError {
                field: String::from("provider.retry.base_delay_ms"),
                message: String::from("Base delay cannot exceed max delay"),
            });
        }

        if let Some(parallelism) = provider.parallelism
            && parallelism > 64
        {
            result.warnings.push(format!(
                "provider.parallelism: {parallelism} operations in flight may trip provider rate limits"
            ));
        }
    }

    fn validate_options(manifest: &Manifest, result: &mut ValidationResult) {
        for name in manifest.config.keys() {
            if !is_valid_identifier(name) {
                result.errors.push(ValidationError {
                    field: format!("config.{name}"),
                    message: format!("Config option name '{name}' is invalid"),
                });
            }
        }

        for name in manifest.values.keys() {
            if !manifest.config.contains_key(name) {
                result.errors.push(ValidationError {
                    field: format!("values.{name}"),
                    message: format!("Value given for undeclared config option '{name}'"),
                });
            }
        }
    }

    fn validate_resources(manifest: &Manifest, result: &mut ValidationResult) {
        if manifest.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared in manifest"));
            return;
        }

        let mut seen_names = HashSet::new();
        for (i, resource) in manifest.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !seen_names.insert(resource.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate resource name: {}", resource.name),
                });
            }

            if !is_valid_identifier(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Resource name '{}' is invalid. Use letters, digits, '-' and '_', starting with a letter or digit.",
                        resource.name
                    ),
                });
            }

            if resource.depends_on.iter().any(|d| *d == resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.depends_on"),
                    message: format!("Resource '{}' depends on itself", resource.name),
                });
            }

            if resource.kind.is_data_source() && !resource.depends_on.is_empty() {
                result.warnings.push(format!(
                    "{prefix}.depends_on: data source '{}' is read before anything is created",
                    resource.name
                ));
            }
        }
    }

    fn validate_outputs(manifest: &Manifest, result: &mut ValidationResult) {
        for name in manifest.outputs.keys() {
            if !is_valid_identifier(name) {
                result.errors.push(ValidationError {
                    field: format!("outputs.{name}"),
                    message: format!("Output name '{name}' is invalid"),
                });
            }
        }
    }
}

/// Flattens errors reported by the `validator` derive into dotted paths.
fn collect_field_errors(prefix: &str, errors: &ValidationErrors, result: &mut ValidationResult) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map_or_else(|| format!("{path} failed the '{}' check", error.code), ToString::to_string);
                    result.errors.push(ValidationError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(&path, inner, result),
            ValidationErrorsKind::List(items) => {
                for (i, inner) in items {
                    collect_field_errors(&format!("{path}[{i}]"), inner, result);
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|first| first.is_ascii_lowercase()) {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Resource, option, and output names: usable as file names and env suffixes.
fn is_valid_identifier(name: &str) -> bool {
    name.len() <= 128
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> Manifest {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("ipfs-node"));
        assert!(is_valid_name("stack-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Ipfs-Node")); // uppercase
        assert!(!is_valid_name("123-stack")); // starts with number
        assert!(!is_valid_name("ipfs_node")); // underscore
        assert!(!is_valid_name("ipfs-")); // ends with hyphen
        assert!(!is_valid_name("ipfs--node")); // consecutive hyphens
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("ipfs-node-vpc"));
        assert!(is_valid_identifier("myPublicIp"));
        assert!(is_valid_identifier("private_key"));
        assert!(!is_valid_identifier("../etc"));
        assert!(!is_valid_identifier(".hidden"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_valid_manifest_passes() {
        let manifest = parse(
            r"
stack:
  name: ipfs-node
resources:
  - name: vpc
    type: vpc
    properties:
      cidr_block: 10.0.0.0/16
",
        );
        let result = ConfigValidator::new().validate(&manifest).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let manifest = parse(
            r"
stack:
  name: ipfs-node
state:
  backend: s3
",
        );
        let result = ConfigValidator::new().check(&manifest);
        assert!(result.errors.iter().any(|e| e.field == "state.bucket"));
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let manifest = parse(
            r"
stack:
  name: ipfs-node
provider:
  kind: http
",
        );
        assert!(ConfigValidator::new().validate(&manifest).is_err());
    }

    #[test]
    fn test_derive_rules_are_reported() {
        let manifest = parse(
            r"
stack:
  name: ipfs-node
provider:
  parallelism: 0
  retry:
    max_attempts: 0
",
        );
        let result = ConfigValidator::new().check(&manifest);
        assert!(result.errors.iter().any(|e| e.field == "provider.parallelism"));
        assert!(result.errors.iter().any(|e| e.field == "provider.retry.max_attempts"));
    }

    #[test]
    fn test_duplicate_and_invalid_resource_names() {
        let manifest = parse(
            r"
stack:
  name: ipfs-node
resources:
  - name: vpc
    type: vpc
  - name: vpc
    type: vpc
  - name: ../escape
    type: internet_gateway
",
        );
        let result = ConfigValidator::new().check(&manifest);
        assert_eq!(result.error_count(), 2);
    }
}
