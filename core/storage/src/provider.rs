//! Secret store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vsync_common::{EngineVersion, Result, SecretPath, SecretValue, SEPARATOR};

/// A backend mount: a path prefix and the engine serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Prefix without a leading separator and with a trailing one (`secret/`).
    pub prefix: String,
    /// Engine type reported by the backend (`kv`, `generic`, `pki`, ...).
    pub engine_type: String,
    /// Storage layout of the mount.
    pub version: EngineVersion,
    /// Free-form description, if the backend has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Mount {
    /// Create a mount, normalizing the prefix to `a/b/` form.
    pub fn new(prefix: &str, engine_type: impl Into<String>, version: EngineVersion) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            engine_type: engine_type.into(),
            version,
            description: None,
        }
    }

    /// Shorthand for a kv mount of the given version.
    pub fn kv(prefix: &str, version: EngineVersion) -> Self {
        Self::new(prefix, "kv", version)
    }
}

/// Bring a mount prefix into `a/b/` form.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = vsync_common::normalize(prefix);
    let trimmed = trimmed.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}{}", trimmed, SEPARATOR)
    }
}

/// Raw secret store capability, implemented by every backend.
///
/// Paths given here are physical: engine-specific segments such as
/// `data/` and `metadata/` have already been inserted, and payloads are
/// already wrapped. See [`crate::KvClient`] for the logical view.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get the store name, used in logs ("source", "destination", ...).
    fn name(&self) -> &str;

    /// Read the payload stored at a physical path.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored there
    /// - `Transport` on network, authentication or protocol failure
    async fn read(&self, path: &SecretPath) -> Result<SecretValue>;

    /// Write a payload, replacing whatever is stored at the path.
    async fn write(&self, path: &SecretPath, payload: &SecretValue) -> Result<()>;

    /// Delete the secret at the path.
    async fn delete(&self, path: &SecretPath) -> Result<()>;

    /// List the child names of a folder.
    ///
    /// Names ending in `/` are folders, all others are leaves.
    ///
    /// # Errors
    /// - `NotFound` if the folder has no children
    async fn list(&self, path: &SecretPath) -> Result<Vec<String>>;

    /// List the mounts of the backend.
    async fn list_mounts(&self) -> Result<Vec<Mount>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("secret"), "secret/");
        assert_eq!(normalize_prefix("/secret/"), "secret/");
        assert_eq!(normalize_prefix("team//a"), "team/a/");
        assert_eq!(normalize_prefix("/"), "");
    }

    #[test]
    fn test_mount_serialization() {
        let mount = Mount::kv("secret", EngineVersion::V2);
        let json = serde_json::to_value(&mount).unwrap();
        assert_eq!(json["prefix"], "secret/");
        assert_eq!(json["version"], "v2");
        assert!(json.get("description").is_none());
    }
}
