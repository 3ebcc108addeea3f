//! Structural comparison of secret values.

use serde::Serialize;

use vsync_common::SecretValue;

/// Whether `candidate` has to be written over `existing`.
pub fn needs_write(candidate: &SecretValue, existing: Option<&SecretValue>) -> bool {
    match existing {
        None => true,
        Some(existing) => !structurally_equal(candidate, existing),
    }
}

/// Deep equality, insensitive to key order at every level.
pub fn structurally_equal(a: &SecretValue, b: &SecretValue) -> bool {
    // Maps are ordered by key, so derived equality is already structural.
    a == b
}

/// Top-level key names that differ between two values.
///
/// Only names are kept so the result can be logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl KeyChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// All affected keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .added
            .iter()
            .chain(&self.removed)
            .chain(&self.changed)
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// Compare `candidate` against `existing`, treating a missing value as empty.
pub fn changed_keys(candidate: &SecretValue, existing: Option<&SecretValue>) -> KeyChanges {
    let mut changes = KeyChanges::default();
    let Some(existing) = existing else {
        changes.added = candidate.keys().cloned().collect();
        return changes;
    };

    for (key, value) in candidate.iter() {
        match existing.get(key) {
            None => changes.added.push(key.clone()),
            Some(old) if old != value => changes.changed.push(key.clone()),
            Some(_) => {}
        }
    }
    changes.removed = existing
        .keys()
        .filter(|key| !candidate.contains_key(key))
        .cloned()
        .collect();
    changes
}
