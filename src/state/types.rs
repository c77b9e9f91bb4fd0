//! Persisted state types.
//!
//! State is split into a header (stack identity, stack outputs, history) and
//! one record per resource, so a single resource can be committed without
//! rewriting the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::StateError;
use crate::resource::ResourceKind;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Number of history entries kept in the header.
pub const MAX_HISTORY: usize = 50;

/// A value as written to disk. Secrets are stored sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    /// Encrypted value; `nonce || ciphertext`, base64.
    Secret {
        /// Sealed payload.
        #[serde(rename = "$secret")]
        ciphertext: String,
    },
    /// Plain JSON value.
    Plain(Value),
}

impl StoredValue {
    /// Returns true if the value is sealed.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Secret { .. })
    }
}

/// Last-applied state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider-assigned id.
    pub id: String,
    /// Last-applied inputs.
    pub inputs: BTreeMap<String, StoredValue>,
    /// Last-known outputs.
    pub outputs: BTreeMap<String, StoredValue>,
    /// Logical names this resource depended on when applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Incremented on every commit of this record.
    pub serial: u64,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Parses a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not a valid record.
    pub fn from_json(content: &str) -> Result<Self, StateError> {
        serde_json::from_str(content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse resource record: {e}")))
    }

    /// Serializes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))
    }
}

/// Stack-level state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHeader {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied manifest.
    #[serde(default)]
    pub config_hash: String,
    /// Salt for the secrets key, base64.
    #[serde(default)]
    pub encryption_salt: Option<String>,
    /// Resolved stack outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, StoredValue>,
    /// When the header was last written.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl StateHeader {
    /// Creates an empty header.
    #[must_use]
    pub fn new(stack: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            encryption_salt: None,
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Parses a header and checks its version.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is invalid or written by another format version.
    pub fn from_json(content: &str) -> Result<Self, StateError> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state file: {e}")))?;
        let found = raw
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if found != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found,
            });
        }
        serde_json::from_value(raw)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state file: {e}")))
    }

    /// Serializes the header.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }
}

/// Header plus every resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentState {
    /// Stack-level state.
    pub header: StateHeader,
    /// Records keyed by logical name.
    pub records: BTreeMap<String, StateRecord>,
}

impl DeploymentState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(stack: &str, environment: &str) -> Self {
        Self {
            header: StateHeader::new(stack, environment),
            records: BTreeMap::new(),
        }
    }

    /// Gets a record by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StateRecord> {
        self.records.get(name)
    }

    /// Returns all record names.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }
}

/// One run in the stack's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// What kind of run.
    pub operation: RunOperation,
    /// Manifest hash at the time.
    pub config_hash: String,
    /// Resources that changed.
    pub resources: Vec<String>,
    /// Whether every operation succeeded.
    pub success: bool,
    /// Summary of failures.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of runs that write history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Plan and apply.
    Up,
    /// Delete everything.
    Destroy,
    /// Sync records with the provider.
    Refresh,
}

impl HistoryEntry {
    /// Creates a successful entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            success: false,
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Up => "up",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}
