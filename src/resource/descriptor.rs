//! Resource descriptors: one declared resource as authored.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::schema::ResourceKind;
use super::value::{InputMap, PlannedInputs, Property, Reference};

/// An immutable declaration of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    /// Logical name, unique within a deployment.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Input properties.
    pub properties: BTreeMap<String, Property>,
    /// Explicit ordering dependencies, in addition to inferred ones.
    pub depends_on: Vec<String>,
}

impl ResourceDescriptor {
    /// Creates a descriptor with no properties.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Property>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds a property that references another resource's output.
    #[must_use]
    pub fn with_ref(mut self, key: impl Into<String>, resource: &str, output: &str) -> Self {
        self.properties
            .insert(key.into(), Property::reference(resource, output));
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Every reference held in the properties.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        self.properties
            .values()
            .flat_map(Property::references)
            .collect()
    }

    /// Names of every resource this one depends on, inferred and explicit.
    #[must_use]
    pub fn dependency_names(&self) -> BTreeSet<String> {
        self.references()
            .into_iter()
            .map(|r| r.resource.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }

    /// Returns the first property still holding a `$config` expression.
    #[must_use]
    pub fn unbound_config(&self) -> Option<&str> {
        self.properties.values().find_map(Property::unbound_config)
    }

    /// Checks the properties against the kind's schema, with placeholders for references.
    ///
    /// # Errors
    ///
    /// Returns the schema violation message.
    pub fn check_schema(&self) -> Result<(), String> {
        let placeholder: serde_json::Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.placeholder()))
            .collect();
        self.kind.check_inputs(Value::Object(placeholder))
    }

    /// Resolves every property.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` could not answer.
    pub fn resolve_inputs<F>(&self, lookup: &F) -> Result<InputMap, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        self.properties
            .iter()
            .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
            .collect()
    }

    /// Evaluates what is knowable about each property before apply.
    #[must_use]
    pub fn planned_inputs<F>(&self, lookup: &F) -> PlannedInputs
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.planned(lookup)))
            .collect()
    }

    /// Input keys whose value derives from a secret output of another resource.
    #[must_use]
    pub fn sensitive_fields<F>(&self, is_secret: &F) -> BTreeSet<String>
    where
        F: Fn(&Reference) -> bool,
    {
        self.properties
            .iter()
            .filter(|(_, v)| v.references().into_iter().any(is_secret))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
