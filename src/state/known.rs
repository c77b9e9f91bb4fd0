//! Decrypted, in-memory view of persisted state used for planning.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::StateError;
use crate::resource::{InputMap, Outputs, ResourceKind};

use super::secrets::SecretsManager;
use super::types::{DeploymentState, StateRecord, StoredValue};

/// Last-known state of one resource with secrets opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorRecord {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider id.
    pub id: String,
    /// Last-applied inputs.
    pub inputs: InputMap,
    /// Last-known outputs.
    pub outputs: Outputs,
    /// Dependencies when last applied.
    pub dependencies: Vec<String>,
    /// Commit serial.
    pub serial: u64,
    /// First creation time.
    pub created_at: DateTime<Utc>,
}

impl PriorRecord {
    /// Opens a persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if a sealed value cannot be opened.
    pub fn open(record: &StateRecord, secrets: &SecretsManager) -> Result<Self, StateError> {
        let inputs = record
            .inputs
            .iter()
            .map(|(k, v)| secrets.open(v).map(|v| (k.clone(), v.value)))
            .collect::<Result<_, _>>()?;
        let outputs = record
            .outputs
            .iter()
            .map(|(k, v)| secrets.open(v).map(|v| (k.clone(), v)))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            name: record.name.clone(),
            kind: record.kind,
            id: record.id.clone(),
            inputs,
            outputs,
            dependencies: record.dependencies.clone(),
            serial: record.serial,
            created_at: record.created_at,
        })
    }

    /// Returns true if any stored value was sealed.
    #[must_use]
    pub fn has_secrets(record: &StateRecord) -> bool {
        record
            .inputs
            .values()
            .chain(record.outputs.values())
            .any(StoredValue::is_secret)
    }
}

/// Every prior record keyed by logical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownState {
    records: BTreeMap<String, PriorRecord>,
}

impl KnownState {
    /// An empty state.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Opens every record of a deployment state.
    ///
    /// # Errors
    ///
    /// Returns an error if a sealed value cannot be opened.
    pub fn open(state: &DeploymentState, secrets: &SecretsManager) -> Result<Self, StateError> {
        let records = state
            .records
            .iter()
            .map(|(name, record)| PriorRecord::open(record, secrets).map(|r| (name.clone(), r)))
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }

    /// Builds a state from already opened records.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = PriorRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Gets a record by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PriorRecord> {
        self.records.get(name)
    }

    /// Iterates records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PriorRecord> {
        self.records.values()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_plain_record_without_passphrase() {
        let now = Utc::now();
        let record = StateRecord {
            name: String::from("net"),
            kind: ResourceKind::Vpc,
            id: String::from("vpc-1"),
            inputs: BTreeMap::from([(
                String::from("cidr_block"),
                StoredValue::Plain(json!("10.0.0.0/16")),
            )]),
            outputs: BTreeMap::from([(String::from("id"), StoredValue::Plain(json!("vpc-1")))]),
            dependencies: Vec::new(),
            serial: 3,
            created_at: now,
            updated_at: now,
        };
        assert!(!PriorRecord::has_secrets(&record));

        let prior = PriorRecord::open(&record, &SecretsManager::locked()).unwrap();
        assert_eq!(prior.inputs["cidr_block"], json!("10.0.0.0/16"));
        assert_eq!(prior.outputs["id"].value, json!("vpc-1"));
        assert_eq!(prior.serial, 3);
    }

    #[test]
    fn test_open_sealed_record_requires_key() {
        let salt = SecretsManager::generate_salt();
        let secrets = SecretsManager::from_passphrase("pw", &salt).unwrap();
        let now = Utc::now();
        let record = StateRecord {
            name: String::from("key"),
            kind: ResourceKind::PrivateKey,
            id: String::from("key-1"),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::from([(
                String::from("private_key_pem"),
                secrets.seal(&json!("PEM")).unwrap(),
            )]),
            dependencies: Vec::new(),
            serial: 1,
            created_at: now,
            updated_at: now,
        };
        assert!(PriorRecord::has_secrets(&record));
        assert!(matches!(
            PriorRecord::open(&record, &SecretsManager::locked()),
            Err(StateError::SecretsLocked)
        ));

        let opened = PriorRecord::open(&record, &secrets).unwrap();
        assert!(opened.outputs["private_key_pem"].secret);
    }
}
