//! The provider boundary.
//!
//! The engine never talks to a cloud directly. Every mutation goes through a
//! [`Provider`], which is injected into the reconciler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ProviderError;
use crate::resource::{InputMap, OutputValue, Outputs, PlannedInputs, PlannedValue, ResourceKind};

/// A resource as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResource {
    /// Provider-assigned id.
    pub id: String,
    /// Raw output values.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl ProviderResource {
    /// Tags outputs with the kind's secret flags; `id` is always present.
    #[must_use]
    pub fn into_outputs(self, kind: ResourceKind) -> Outputs {
        let mut outputs: Outputs = self
            .outputs
            .into_iter()
            .map(|(key, value)| {
                let tagged = if kind.is_secret_output(&key) {
                    OutputValue::secret(value)
                } else {
                    OutputValue::plain(value)
                };
                (key, tagged)
            })
            .collect();
        outputs
            .entry(String::from("id"))
            .or_insert_with(|| OutputValue::plain(Value::String(self.id)));
        outputs
    }
}

/// One input that differs between the recorded and the desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Input key.
    pub field: String,
    /// Last-applied value, if the field was set.
    pub old: Option<Value>,
    /// Desired value, or unknown until a dependency applies.
    pub new: PlannedValue,
    /// Changing this field requires replacement.
    pub forces_replacement: bool,
    /// The value derives from a secret and must not be rendered.
    pub sensitive: bool,
}

/// Compares recorded inputs against desired inputs.
///
/// Unknown desired values always count as changes. A field missing on one
/// side is treated as null.
#[must_use]
pub fn changed_fields(kind: ResourceKind, recorded: &InputMap, desired: &PlannedInputs) -> Vec<FieldChange> {
    let immutable = kind.immutable_fields();
    let keys: BTreeSet<&String> = recorded.keys().chain(desired.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let old = recorded.get(key).filter(|v| !v.is_null());
            let new = desired
                .get(key)
                .cloned()
                .unwrap_or(PlannedValue::Known(Value::Null));
            let changed = match &new {
                PlannedValue::Unknown => true,
                PlannedValue::Known(value) if value.is_null() => old.is_some(),
                PlannedValue::Known(value) => old != Some(value),
            };
            changed.then(|| FieldChange {
                field: key.clone(),
                old: old.cloned(),
                new,
                forces_replacement: immutable.contains(&key.as_str()),
                sensitive: false,
            })
        })
        .collect()
}

/// Create, read, update, delete, and diff for every resource kind.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Creates a resource, or performs the lookup for a data source.
    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &InputMap,
    ) -> Result<ProviderResource, ProviderError>;

    /// Reads a resource; `None` if it no longer exists.
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<ProviderResource>, ProviderError>;

    /// Updates a resource in place.
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        old: &InputMap,
        new: &InputMap,
    ) -> Result<ProviderResource, ProviderError>;

    /// Deletes a resource. Deleting something already gone succeeds.
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError>;

    /// Lists the changes needed to move `recorded` to `desired`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ImmutableProperty`] when a change cannot be
    /// applied in place.
    fn diff(
        &self,
        kind: ResourceKind,
        recorded: &InputMap,
        desired: &PlannedInputs,
    ) -> Result<Vec<FieldChange>, ProviderError> {
        let changes = changed_fields(kind, recorded, desired);
        if let Some(change) = changes.iter().find(|c| c.forces_replacement) {
            return Err(ProviderError::ImmutableProperty {
                kind: kind.to_string(),
                field: change.field.clone(),
            });
        }
        Ok(changes)
    }
}
