//! Dependency graph over resource descriptors.
//!
//! Edges run from a resource to every resource it references (or names in
//! `depends_on`). The graph is validated on construction: names are unique,
//! every reference resolves to a declared resource and output, the relation
//! is acyclic, and inputs match the kind's schema.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::GraphError;
use crate::resource::ResourceDescriptor;

/// A validated, acyclic resource graph.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, ResourceDescriptor>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl ResourceGraph {
    /// Builds and validates a graph from declarations.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unbound config options, unknown
    /// references, cycles, or schema violations.
    pub fn build(descriptors: Vec<ResourceDescriptor>) -> Result<Self, GraphError> {
        let mut nodes = BTreeMap::new();
        for descriptor in descriptors {
            if nodes.contains_key(&descriptor.name) {
                return Err(GraphError::DuplicateName {
                    name: descriptor.name,
                });
            }
            nodes.insert(descriptor.name.clone(), descriptor);
        }

        for descriptor in nodes.values() {
            if let Some(option) = descriptor.unbound_config() {
                return Err(GraphError::UnboundConfig {
                    resource: descriptor.name.clone(),
                    option: option.to_string(),
                });
            }
            Self::check_references(descriptor, &nodes)?;
        }

        let dependencies: BTreeMap<String, BTreeSet<String>> = nodes
            .values()
            .map(|d| (d.name.clone(), d.dependency_names()))
            .collect();

        let mut dependents: BTreeMap<String, BTreeSet<String>> =
            nodes.keys().map(|k| (k.clone(), BTreeSet::new())).collect();
        for (name, deps) in &dependencies {
            for dep in deps {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(name.clone());
                }
            }
        }

        let order = kahn_order(&dependencies).map_err(|remaining| GraphError::Cycle {
            cycle: describe_cycle(&dependencies, &remaining),
        })?;

        for descriptor in nodes.values() {
            descriptor
                .check_schema()
                .map_err(|message| GraphError::Schema {
                    resource: descriptor.name.clone(),
                    message,
                })?;
        }

        debug!("Built resource graph with {} nodes: {}", order.len(), order.join(", "));

        Ok(Self {
            nodes,
            dependencies,
            dependents,
            order,
        })
    }

    fn check_references(
        descriptor: &ResourceDescriptor,
        nodes: &BTreeMap<String, ResourceDescriptor>,
    ) -> Result<(), GraphError> {
        for reference in descriptor.references() {
            let Some(source) = nodes.get(&reference.resource) else {
                return Err(GraphError::UnknownReference {
                    resource: descriptor.name.clone(),
                    target: format!("resource '{}'", reference.resource),
                });
            };
            if source.kind.output(&reference.output).is_none() {
                return Err(GraphError::UnknownReference {
                    resource: descriptor.name.clone(),
                    target: format!("output '{reference}' ({} has no such output)", source.kind),
                });
            }
        }
        for name in &descriptor.depends_on {
            if !nodes.contains_key(name) {
                return Err(GraphError::UnknownReference {
                    resource: descriptor.name.clone(),
                    target: format!("resource '{name}' in depends_on"),
                });
            }
        }
        Ok(())
    }

    /// Resource names in dependency order, ties broken by name.
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Descriptors in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// Looks up a descriptor.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.nodes.get(name)
    }

    /// Returns true if the resource is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies of a resource.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.dependencies
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of a resource.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.dependents
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Kahn's algorithm over `node -> dependencies`, popping the smallest ready key.
///
/// Dependencies that are not themselves keys are ignored. On a cycle, returns
/// the set of nodes that could not be ordered.
pub(crate) fn kahn_order<K>(dependencies: &BTreeMap<K, BTreeSet<K>>) -> Result<Vec<K>, BTreeSet<K>>
where
    K: Ord + Clone,
{
    let mut pending: BTreeMap<&K, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&K, Vec<&K>> = BTreeMap::new();
    for (node, deps) in dependencies {
        let live: Vec<&K> = deps.iter().filter(|d| dependencies.contains_key(*d)).collect();
        pending.insert(node, live.len());
        for dep in live {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut ready: BTreeSet<&K> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.clone());
        for &dependent in dependents.get(node).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() == dependencies.len() {
        Ok(order)
    } else {
        let done: BTreeSet<&K> = order.iter().collect();
        Err(dependencies
            .keys()
            .filter(|k| !done.contains(k))
            .cloned()
            .collect())
    }
}

/// Walks dependency edges inside the unordered remainder until a node repeats.
fn describe_cycle(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    remaining: &BTreeSet<String>,
) -> String {
    let Some(start) = remaining.first() else {
        return String::from("<unknown>");
    };

    let mut path: Vec<&String> = vec![start];
    let mut current = start;
    loop {
        let next = dependencies
            .get(current)
            .and_then(|deps| deps.iter().find(|d| remaining.contains(*d)));
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<&str> = path[pos..].iter().map(|s| s.as_str()).collect();
            cycle.push(next);
            return cycle.join(" -> ");
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" -> ")
}
