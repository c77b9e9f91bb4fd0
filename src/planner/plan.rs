//! Plan types and construction.
//!
//! A plan is a list of operations whose vector order is a valid execution
//! order. Each operation names the earlier operations it waits for.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::error::PlanError;
use crate::graph::{kahn_order, ResourceGraph};
use crate::provider::FieldChange;
use crate::resource::{ResourceDescriptor, ResourceKind};
use crate::state::{KnownState, PriorRecord};

use super::diff::{Decision, ResourceDiff};

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    NoOp,
}

/// One step of a plan.
#[derive(Debug, Clone)]
pub struct PlanOperation {
    /// Position in the plan.
    pub index: usize,
    /// Logical name.
    pub resource: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Action.
    pub action: Action,
    /// Why this action was chosen.
    pub reason: String,
    /// Changed inputs, for updates and replacements.
    pub changes: Vec<FieldChange>,
    /// Indices of operations that must succeed first.
    pub depends_on: Vec<usize>,
    /// Desired declaration; absent for deletes.
    pub desired: Option<ResourceDescriptor>,
    /// Last-known state; absent for fresh creates.
    pub prior: Option<PriorRecord>,
    /// Part of a delete-then-create pair.
    pub replacement: bool,
}

/// An ordered plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Manifest hash this plan is based on.
    pub config_hash: String,
    /// Operations in execution order.
    pub operations: Vec<PlanOperation>,
}

/// Phase 0 sorts deletes ahead of everything else among ready operations.
type OpKey = (u8, String);

const DELETE_PHASE: u8 = 0;
const APPLY_PHASE: u8 = 1;

struct Draft {
    resource: String,
    kind: ResourceKind,
    action: Action,
    reason: String,
    changes: Vec<FieldChange>,
    desired: Option<ResourceDescriptor>,
    prior: Option<PriorRecord>,
    replacement: bool,
}

impl Plan {
    /// Builds a plan from per-resource decisions.
    ///
    /// # Errors
    ///
    /// Returns an error if the operations cannot be ordered.
    pub fn build(
        diffs: Vec<ResourceDiff>,
        graph: &ResourceGraph,
        known: &KnownState,
        config_hash: &str,
    ) -> Result<Self, PlanError> {
        let mut drafts: BTreeMap<OpKey, Draft> = BTreeMap::new();

        for diff in diffs {
            let ResourceDiff {
                name,
                kind,
                decision,
                changes,
            } = diff;
            let desired = graph.get(&name).cloned();
            let prior = known.get(&name).cloned();

            match decision {
                Decision::Create { reason } => {
                    drafts.insert(
                        (APPLY_PHASE, name.clone()),
                        Draft::apply(name, kind, Action::Create, reason, changes, desired, prior, false),
                    );
                }
                Decision::Update => {
                    drafts.insert(
                        (APPLY_PHASE, name.clone()),
                        Draft::apply(name, kind, Action::Update, String::from("inputs changed"), changes, desired, prior, false),
                    );
                }
                Decision::NoOp => {
                    drafts.insert(
                        (APPLY_PHASE, name.clone()),
                        Draft::apply(name, kind, Action::NoOp, String::from("up to date"), changes, desired, prior, false),
                    );
                }
                Decision::Replace { reason } => {
                    let prior_kind = prior.as_ref().map_or(kind, |p| p.kind);
                    drafts.insert(
                        (DELETE_PHASE, name.clone()),
                        Draft {
                            resource: name.clone(),
                            kind: prior_kind,
                            action: Action::Delete,
                            reason: format!("replace: {reason}"),
                            changes: changes.clone(),
                            desired: None,
                            prior: prior.clone(),
                            replacement: true,
                        },
                    );
                    drafts.insert(
                        (APPLY_PHASE, name.clone()),
                        Draft::apply(name, kind, Action::Create, format!("replace: {reason}"), changes, desired, prior, true),
                    );
                }
                Decision::Delete { reason } => {
                    drafts.insert(
                        (DELETE_PHASE, name.clone()),
                        Draft {
                            resource: name.clone(),
                            kind,
                            action: Action::Delete,
                            reason,
                            changes,
                            desired: None,
                            prior,
                            replacement: false,
                        },
                    );
                }
            }
        }

        let (hard, soft) = Self::edges(&drafts, graph, known);
        let mut combined = hard.clone();
        for (key, deps) in &soft {
            combined.entry(key.clone()).or_default().extend(deps.iter().cloned());
        }

        let (order, edges) = match kahn_order(&combined) {
            Ok(order) => (order, combined),
            Err(_) => {
                debug!("Relaxing removal ordering to break an operation cycle");
                let order = kahn_order(&hard).map_err(|remaining| PlanError::InvalidRecord {
                    resource: remaining
                        .iter()
                        .map(|(_, name)| name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    message: String::from("operations form a cycle"),
                })?;
                (order, hard)
            }
        };

        let positions: BTreeMap<&OpKey, usize> =
            order.iter().enumerate().map(|(i, key)| (key, i)).collect();

        let mut operations = Vec::with_capacity(order.len());
        for (index, key) in order.iter().enumerate() {
            let Some(draft) = drafts.remove(key) else {
                continue;
            };
            let mut depends_on: Vec<usize> = edges
                .get(key)
                .into_iter()
                .flatten()
                .filter_map(|dep| positions.get(dep).copied())
                .collect();
            depends_on.sort_unstable();
            depends_on.dedup();

            operations.push(PlanOperation {
                index,
                resource: draft.resource,
                kind: draft.kind,
                action: draft.action,
                reason: draft.reason,
                changes: draft.changes,
                depends_on,
                desired: draft.desired,
                prior: draft.prior,
                replacement: draft.replacement,
            });
        }

        Ok(Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operations,
        })
    }

    /// Computes hard and soft ordering edges between draft operations.
    ///
    /// Soft edges make a removed resource wait for its surviving dependents
    /// to be applied first; they are dropped if they would close a cycle.
    fn edges(
        drafts: &BTreeMap<OpKey, Draft>,
        graph: &ResourceGraph,
        known: &KnownState,
    ) -> (BTreeMap<OpKey, BTreeSet<OpKey>>, BTreeMap<OpKey, BTreeSet<OpKey>>) {
        let mut hard: BTreeMap<OpKey, BTreeSet<OpKey>> =
            drafts.keys().map(|k| (k.clone(), BTreeSet::new())).collect();
        let mut soft: BTreeMap<OpKey, BTreeSet<OpKey>> = BTreeMap::new();

        let mut recorded_dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for record in known.iter() {
            for dep in &record.dependencies {
                recorded_dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(record.name.as_str());
            }
        }

        for (key, draft) in drafts {
            let (phase, name) = key;
            let deps = hard.entry(key.clone()).or_default();

            if *phase == APPLY_PHASE {
                for dep in graph.dependencies(name) {
                    deps.insert((APPLY_PHASE, dep.to_string()));
                }
                if draft.replacement {
                    deps.insert((DELETE_PHASE, name.clone()));
                }
                continue;
            }

            for dependent in recorded_dependents.get(name.as_str()).into_iter().flatten() {
                let delete_key = (DELETE_PHASE, (*dependent).to_string());
                let apply_key = (APPLY_PHASE, (*dependent).to_string());
                if drafts.contains_key(&delete_key) {
                    deps.insert(delete_key);
                } else if !draft.replacement && drafts.contains_key(&apply_key) {
                    soft.entry(key.clone()).or_default().insert(apply_key);
                }
            }
        }

        (hard, soft)
    }

    /// Builds an all-delete plan for every known record.
    ///
    /// # Errors
    ///
    /// Returns an error if recorded dependencies form a cycle.
    pub fn destroy(known: &KnownState, config_hash: &str) -> Result<Self, PlanError> {
        let diffs: Vec<ResourceDiff> = known
            .iter()
            .map(|record| ResourceDiff {
                name: record.name.clone(),
                kind: record.kind,
                decision: Decision::Delete {
                    reason: String::from("destroy requested"),
                },
                changes: Vec::new(),
            })
            .collect();

        Self::build(diffs, &ResourceGraph::default(), known, config_hash)
    }

    /// Creates an empty plan.
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operations: Vec::new(),
        }
    }

    /// Returns true if no operation changes anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(|op| op.action == Action::NoOp)
    }

    /// Number of operations with `action`.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.operations.iter().filter(|op| op.action == action).count()
    }

    /// Gets an operation by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PlanOperation> {
        self.operations.get(index)
    }

    /// Operations waiting directly on `index`.
    #[must_use]
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.operations
            .iter()
            .filter(|op| op.depends_on.contains(&index))
            .map(|op| op.index)
            .collect()
    }

    /// Operations for `resource`, in plan order.
    pub fn operations_for<'a>(&'a self, resource: &'a str) -> impl Iterator<Item = &'a PlanOperation> {
        self.operations.iter().filter(move |op| op.resource == resource)
    }

    /// Returns `(create, update, delete, noop)` counts.
    #[must_use]
    pub fn summary(&self) -> (usize, usize, usize, usize) {
        (
            self.count(Action::Create),
            self.count(Action::Update),
            self.count(Action::Delete),
            self.count(Action::NoOp),
        )
    }

    /// Describes how `other` differs from this plan, or `None` when both
    /// would make the same changes to the same manifest.
    #[must_use]
    pub fn divergence(&self, other: &Self) -> Option<String> {
        if self.config_hash != other.config_hash {
            return Some(String::from("manifest or config options changed"));
        }
        let same = self.operations.len() == other.operations.len()
            && self.operations.iter().zip(&other.operations).all(|(a, b)| {
                a.resource == b.resource
                    && a.action == b.action
                    && a.replacement == b.replacement
                    && a.changes == b.changes
            });
        (!same).then(|| {
            let (c, u, d, n) = other.summary();
            format!("now {c} to create, {u} to update, {d} to delete, {n} unchanged")
        })
    }
}

impl Draft {
    #[allow(clippy::too_many_arguments)]
    fn apply(
        resource: String,
        kind: ResourceKind,
        action: Action,
        reason: String,
        changes: Vec<FieldChange>,
        desired: Option<ResourceDescriptor>,
        prior: Option<PriorRecord>,
        replacement: bool,
    ) -> Self {
        Self {
            resource,
            kind,
            action,
            reason,
            changes,
            desired,
            prior,
            replacement,
        }
    }
}

impl PlanOperation {
    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {} '{}'", self.kind, self.resource),
            Action::Update => format!("Update {} '{}'", self.kind, self.resource),
            Action::Delete => format!("Delete {} '{}'", self.kind, self.resource),
            Action::NoOp => format!("No change for '{}'", self.resource),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.resource)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} operations):", self.operations.len())?;
        for op in &self.operations {
            writeln!(f, "  {}. {op}", op.index)?;
        }
        Ok(())
    }
}
