//! Per-resource diff between declarations and recorded state.
//!
//! Resources are visited in dependency order so that each decision can see
//! what its dependencies will do. A reference into a dependency is known at
//! plan time only if that dependency keeps its outputs: it is unchanged, or
//! it is updated in place and the output is stable across updates.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{PlanError, ProviderError};
use crate::graph::ResourceGraph;
use crate::provider::{changed_fields, FieldChange, Provider};
use crate::resource::{Reference, ResourceDescriptor, ResourceKind};
use crate::state::{KnownState, PriorRecord};

/// What to do with one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not recorded yet.
    Create {
        /// Why.
        reason: String,
    },
    /// Recorded and changeable in place.
    Update,
    /// Recorded and must be deleted, then created again.
    Replace {
        /// Why.
        reason: String,
    },
    /// Recorded but no longer declared.
    Delete {
        /// Why.
        reason: String,
    },
    /// Recorded and unchanged.
    NoOp,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource name.
    pub name: String,
    /// Kind of the declaration, or of the record for deletes.
    pub kind: ResourceKind,
    /// Decision.
    pub decision: Decision,
    /// Changed inputs.
    pub changes: Vec<FieldChange>,
}

/// Engine for computing diffs between declarations and recorded state.
pub struct DiffEngine<'a> {
    provider: &'a dyn Provider,
}

impl<'a> DiffEngine<'a> {
    /// Creates a new diff engine.
    #[must_use]
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self { provider }
    }

    /// Computes a decision for every declared and every recorded resource.
    ///
    /// Declared resources come first in dependency order, followed by
    /// removed records in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects a diff for a reason other
    /// than an immutable field.
    pub fn compute(&self, graph: &ResourceGraph, known: &KnownState) -> Result<Vec<ResourceDiff>, PlanError> {
        let mut decided: BTreeMap<String, Decision> = BTreeMap::new();
        let mut diffs = Vec::with_capacity(graph.len() + known.len());

        for descriptor in graph.iter() {
            let prior = known.get(&descriptor.name);
            let (decision, changes) = self.decide(descriptor, prior, graph, known, &decided)?;
            debug!("{} ({}): {:?}", descriptor.name, descriptor.kind, decision);

            decided.insert(descriptor.name.clone(), decision.clone());
            diffs.push(ResourceDiff {
                name: descriptor.name.clone(),
                kind: descriptor.kind,
                decision,
                changes,
            });
        }

        for record in known.iter().filter(|r| !graph.contains(&r.name)) {
            debug!("{} ({}): no longer declared", record.name, record.kind);
            diffs.push(ResourceDiff {
                name: record.name.clone(),
                kind: record.kind,
                decision: Decision::Delete {
                    reason: String::from("no longer declared"),
                },
                changes: Vec::new(),
            });
        }

        Ok(diffs)
    }

    fn decide(
        &self,
        descriptor: &ResourceDescriptor,
        prior: Option<&PriorRecord>,
        graph: &ResourceGraph,
        known: &KnownState,
        decided: &BTreeMap<String, Decision>,
    ) -> Result<(Decision, Vec<FieldChange>), PlanError> {
        let Some(prior) = prior else {
            return Ok((
                Decision::Create {
                    reason: String::from("not yet created"),
                },
                Vec::new(),
            ));
        };

        if prior.kind != descriptor.kind {
            return Ok((
                Decision::Replace {
                    reason: format!("kind changed from {} to {}", prior.kind, descriptor.kind),
                },
                Vec::new(),
            ));
        }

        let lookup = |r: &Reference| known_output(r, graph, known, decided);
        let desired = descriptor.planned_inputs(&lookup);

        let is_secret = |r: &Reference| {
            graph
                .get(&r.resource)
                .is_some_and(|d| d.kind.is_secret_output(&r.output))
        };
        let sensitive = descriptor.sensitive_fields(&is_secret);
        let mark = |mut changes: Vec<FieldChange>| {
            for change in &mut changes {
                change.sensitive = sensitive.contains(&change.field);
            }
            changes
        };

        match self.provider.diff(descriptor.kind, &prior.inputs, &desired) {
            Ok(changes) if changes.is_empty() => Ok((Decision::NoOp, Vec::new())),
            Ok(changes) => Ok((Decision::Update, mark(changes))),
            Err(ProviderError::ImmutableProperty { field, .. }) => Ok((
                Decision::Replace {
                    reason: format!("`{field}` cannot change in place"),
                },
                mark(changed_fields(descriptor.kind, &prior.inputs, &desired)),
            )),
            Err(source) => Err(PlanError::DiffFailed {
                resource: descriptor.name.clone(),
                source,
            }),
        }
    }
}

/// Output value of a dependency that is already known at plan time.
fn known_output(
    reference: &Reference,
    graph: &ResourceGraph,
    known: &KnownState,
    decided: &BTreeMap<String, Decision>,
) -> Option<serde_json::Value> {
    let kind = graph.get(&reference.resource)?.kind;
    let keeps_value = match decided.get(&reference.resource)? {
        Decision::NoOp => true,
        Decision::Update => kind.output(&reference.output).is_some_and(|o| o.stable),
        Decision::Create { .. } | Decision::Replace { .. } | Decision::Delete { .. } => false,
    };
    if !keeps_value {
        return None;
    }
    known
        .get(&reference.resource)?
        .outputs
        .get(&reference.output)
        .map(|o| o.value.clone())
}
