//! Engine-aware logical view over a secret store.

use std::sync::Arc;
use tracing::debug;

use vsync_common::{EngineVersion, Error, Result, SecretPath, SecretValue};

use crate::mounts::{MountResolver, MountTable};
use crate::provider::SecretStore;
use crate::translate::{translate, unwrap_for_read, wrap_for_write, Operation};

/// Secret store client speaking logical paths.
///
/// Every operation resolves the owning mount (fetching the mount table
/// once per client), translates the path and shapes the payload for the
/// mount's engine version.
pub struct KvClient {
    store: Arc<dyn SecretStore>,
    mounts: MountResolver,
}

impl KvClient {
    /// Wrap a store; the mount table is fetched on first use.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        let mounts = MountResolver::new(store.clone());
        Self { store, mounts }
    }

    /// Wrap a store with an already known mount table.
    pub fn with_mounts(store: Arc<dyn SecretStore>, table: MountTable) -> Self {
        let mounts = MountResolver::with_table(store.clone(), table);
        Self { store, mounts }
    }

    /// Name of the underlying store.
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// The underlying raw store.
    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Mount table of the store, fetched on first use.
    pub async fn mount_table(&self) -> Result<&MountTable> {
        self.mounts.table().await
    }

    /// Engine version of the mount owning a path.
    pub async fn engine(&self, path: &SecretPath) -> Result<EngineVersion> {
        self.mounts.resolve_engine(path).await
    }

    /// Read the current value of a leaf.
    ///
    /// Returns `Ok(None)` when nothing is stored or the secret was
    /// soft-deleted.
    ///
    /// # Errors
    /// - `Transport` and malformed payloads are returned, never mapped to `None`
    /// - `InvalidInput` for a folder path
    pub async fn read(&self, path: &SecretPath) -> Result<Option<SecretValue>> {
        ensure_leaf(path)?;
        let mount = self.mounts.resolve(path).await?;
        let physical = translate(path, &mount, Operation::Read);
        debug!(store = self.name(), path = %path, physical = %physical, "Reading secret");

        match self.store.read(&physical).await {
            Ok(payload) => unwrap_for_read(payload, mount.version),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write a value to a leaf, replacing the current one.
    ///
    /// Returns the physical path written.
    pub async fn write(&self, path: &SecretPath, value: &SecretValue) -> Result<SecretPath> {
        ensure_leaf(path)?;
        let mount = self.mounts.resolve(path).await?;
        let physical = translate(path, &mount, Operation::Write);
        let payload = wrap_for_write(value, mount.version);
        debug!(store = self.name(), path = %path, physical = %physical, "Writing secret");

        self.store.write(&physical, &payload).await?;
        Ok(physical)
    }

    /// Delete a leaf. Returns the physical path deleted.
    pub async fn delete(&self, path: &SecretPath) -> Result<SecretPath> {
        ensure_leaf(path)?;
        let mount = self.mounts.resolve(path).await?;
        let physical = translate(path, &mount, Operation::Delete);
        debug!(store = self.name(), path = %path, physical = %physical, "Deleting secret");

        self.store.delete(&physical).await?;
        Ok(physical)
    }

    /// List the child names of a folder.
    ///
    /// A folder the backend does not know is empty.
    pub async fn list(&self, path: &SecretPath) -> Result<Vec<String>> {
        let folder = path.as_folder();
        let mount = self.mounts.resolve(&folder).await?;
        let physical = translate(&folder, &mount, Operation::List);
        debug!(store = self.name(), path = %folder, physical = %physical, "Listing folder");

        match self.store.list(&physical).await {
            Ok(names) => Ok(names),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

fn ensure_leaf(path: &SecretPath) -> Result<()> {
    if path.is_folder() || path.is_root() {
        return Err(Error::InvalidInput(format!(
            "'{}' is a folder, not a secret",
            path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn secret(pairs: &[(&str, &str)]) -> SecretValue {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[tokio::test]
    async fn test_v2_write_lands_in_data_segment() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        let client = KvClient::new(store.clone());

        let path = SecretPath::new("/secret/app/db");
        let physical = client.write(&path, &secret(&[("user", "a")])).await.unwrap();
        assert_eq!(physical.as_str(), "/secret/data/app/db");
        assert_eq!(store.get("secret/app/db"), Some(secret(&[("user", "a")])));

        let read = client.read(&path).await.unwrap();
        assert_eq!(read, Some(secret(&[("user", "a")])));
    }

    #[tokio::test]
    async fn test_v1_round_trip() {
        let store = Arc::new(MemoryStore::new().with_mount("kv", EngineVersion::V1));
        let client = KvClient::new(store.clone());

        let path = SecretPath::new("kv/app/db");
        let physical = client.write(&path, &secret(&[("k", "v")])).await.unwrap();
        assert_eq!(physical, path);
        assert_eq!(client.read(&path).await.unwrap(), Some(secret(&[("k", "v")])));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        let client = KvClient::new(store);
        assert_eq!(client.read(&SecretPath::new("secret/nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_soft_deleted_is_none() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        store.insert("secret/app/db", secret(&[("user", "a")]));
        let client = KvClient::new(store.clone());

        client.delete(&SecretPath::new("secret/app/db")).await.unwrap();
        assert_eq!(client.read(&SecretPath::new("secret/app/db")).await.unwrap(), None);
        // Soft-deleted secrets stay listed.
        assert_eq!(
            client.list(&SecretPath::new("secret/app")).await.unwrap(),
            vec!["db".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_transport_error_surfaces() {
        let store = Arc::new(MemoryStore::new());
        store.insert("app/db", secret(&[("user", "a")]));
        store.fail_under("app/");
        let client = KvClient::new(store);

        let err = client.read(&SecretPath::new("app/db")).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_list_unknown_folder_is_empty() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        let client = KvClient::new(store);
        assert!(client.list(&SecretPath::new("secret/none")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_rejects_folder() {
        let client = KvClient::new(Arc::new(MemoryStore::new()));
        let err = client
            .write(&SecretPath::new("app/"), &SecretValue::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_read_and_delete_reject_folder() {
        let store = Arc::new(MemoryStore::new());
        let client = KvClient::new(store.clone());

        let err = client.read(&SecretPath::new("app/")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = client.read(&SecretPath::new("/")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = client.delete(&SecretPath::new("app/")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.reads(), 0);
        assert_eq!(store.deletes(), 0);
    }
}
