//! Error types for the deployment engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! manifest loading, graph building, state management, provider calls,
//! planning, and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the deployment engine.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A property expression is malformed.
    #[error("Invalid property expression at {path}: {message}")]
    InvalidExpression {
        /// Dotted path of the property.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `--set` override or `$config` names an option that is not declared.
    #[error("Unknown config option: {name}")]
    UnknownOption {
        /// The option name.
        name: String,
    },
}

/// Errors raised while assembling the resource graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two resources share a logical name.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A reference names a resource (or an output) that does not exist.
    #[error("{resource} references unknown {target}")]
    UnknownReference {
        /// Resource holding the reference.
        resource: String,
        /// Description of the missing target.
        target: String,
    },

    /// The dependency relation is not acyclic.
    #[error("Dependency cycle detected: {cycle}")]
    Cycle {
        /// The cycle path, e.g. `a -> b -> a`.
        cycle: String,
    },

    /// Inputs do not match the resource kind's schema.
    #[error("Invalid inputs for {resource}: {message}")]
    Schema {
        /// Resource name.
        resource: String,
        /// Schema violation.
        message: String,
    },

    /// A `$config` expression survived binding.
    #[error("{resource} uses config option '{option}' that was never bound")]
    UnboundConfig {
        /// Resource name.
        resource: String,
        /// Option name.
        option: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// A secret must be sealed or opened but no passphrase is configured.
    #[error("Secrets are locked: set IPFS_DEPLOY_PASSPHRASE to read or write secret values")]
    SecretsLocked,

    /// Encryption or decryption failed.
    #[error("Secret encryption error: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised by a provider adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The API asked us to slow down.
    #[error("Provider throttled the request: {message}")]
    Throttled {
        /// Message from the API.
        message: String,
        /// Seconds to wait before retrying, when the API said so.
        retry_after_secs: Option<u64>,
    },

    /// Network-level failure.
    #[error("Network error communicating with provider: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Server-side failure (5xx).
    #[error("Provider unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Message from the API.
        message: String,
    },

    /// The request was rejected as invalid.
    #[error("Invalid parameters: {message}")]
    InvalidParameters {
        /// Message from the API.
        message: String,
    },

    /// Authentication or authorization failed.
    #[error("Provider authentication failed: {message}")]
    Unauthorized {
        /// Description of the auth failure.
        message: String,
    },

    /// The resource does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Provider id.
        id: String,
    },

    /// A changed input cannot be updated in place.
    #[error("Property '{field}' of {kind} cannot be changed in place")]
    ImmutableProperty {
        /// Resource kind.
        kind: String,
        /// Field name.
        field: String,
    },

    /// Any other API failure.
    #[error("Provider API request failed: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the API.
        message: String,
    },

    /// Unparseable response.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A prior state record is unusable for planning.
    #[error("Cannot plan {resource}: {message}")]
    InvalidRecord {
        /// Resource name.
        resource: String,
        /// What is wrong.
        message: String,
    },

    /// The provider rejected the diff outright.
    #[error("Diff failed for {resource}: {source}")]
    DiffFailed {
        /// Resource name.
        resource: String,
        /// Provider error.
        source: ProviderError,
    },

    /// State or the manifest moved between approval and apply.
    #[error("Plan changed since it was approved ({message}); preview again")]
    Stale {
        /// What differs.
        message: String,
    },
}

/// Execution errors that abort a run before any operation starts.
#[derive(Debug, Error)]
pub enum ExecError {
    /// An operation references an index outside the plan.
    #[error("Malformed plan: {message}")]
    MalformedPlan {
        /// Description.
        message: String,
    },

    /// A reference could not be resolved at launch time.
    #[error("Unresolved reference {reference} for {resource}")]
    Unresolved {
        /// Resource whose input is unresolved.
        resource: String,
        /// The reference, `resource.output`.
        reference: String,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an invalid expression error.
    #[must_use]
    pub fn expression(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Returns true for failures worth retrying (throttling, network, 5xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Network { .. } | Self::Unavailable { .. }
        )
    }

    /// Returns the delay the API asked for, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Throttled {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::network("reset").is_transient());
        assert!(
            ProviderError::Throttled {
                message: String::from("slow down"),
                retry_after_secs: Some(3),
            }
            .is_transient()
        );
        assert!(
            ProviderError::Unavailable {
                status: 503,
                message: String::new(),
            }
            .is_transient()
        );
        assert!(
            !ProviderError::InvalidParameters {
                message: String::from("bad cidr"),
            }
            .is_transient()
        );
        assert!(!ProviderError::api_error(409, "conflict").is_transient());
    }

    #[test]
    fn test_retry_after_only_for_throttling() {
        let throttled = ProviderError::Throttled {
            message: String::new(),
            retry_after_secs: Some(7),
        };
        assert_eq!(throttled.retry_after_secs(), Some(7));
        assert_eq!(ProviderError::network("x").retry_after_secs(), None);
    }

    #[test]
    fn test_deploy_error_retryable() {
        let err = DeployError::from(ProviderError::network("timeout"));
        assert!(err.is_retryable());
        let err = DeployError::from(GraphError::Cycle {
            cycle: String::from("a -> b -> a"),
        });
        assert!(!err.is_retryable());
    }
}
