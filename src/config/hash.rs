//! Manifest hashing for change detection.
//!
//! The hash covers everything that shapes the desired state: stack identity,
//! resolved config options, resources, and outputs. It is recorded in the
//! state header and in each history entry.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::{Manifest, ResourceSpec};

/// Hasher for computing manifest hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the desired state.
    ///
    /// Resource declaration order does not affect the hash.
    #[must_use]
    pub fn hash_config(&self, manifest: &Manifest, options: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();

        hasher.update(manifest.stack.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(manifest.stack.environment.as_bytes());
        hasher.update([0u8]);

        for (name, value) in options {
            hasher.update(name.as_bytes());
            hasher.update(canonical(value).as_bytes());
        }

        let mut resources: Vec<&ResourceSpec> = manifest.resources.iter().collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        for resource in resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        for (name, value) in &manifest.outputs {
            hasher.update(name.as_bytes());
            hasher.update(canonical(value).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.kind.as_str().as_bytes());

        for (key, value) in &resource.properties {
            hasher.update(key.as_bytes());
            hasher.update(canonical(value).as_bytes());
        }

        let mut depends_on: Vec<&String> = resource.depends_on.iter().collect();
        depends_on.sort();
        for dependency in depends_on {
            hasher.update(dependency.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Objects serialize with sorted keys, so this is stable across runs.
fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
