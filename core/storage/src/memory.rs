//! In-memory secret store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vsync_common::{EngineVersion, Error, Result, SecretPath, SecretValue, Value, SEPARATOR};

use crate::mounts::MountTable;
use crate::provider::{Mount, SecretStore};
use crate::translate::{Operation, DATA_KEY};

/// Stored secret. `value` is `None` once a v2 secret is soft-deleted.
#[derive(Debug, Clone)]
struct Entry {
    value: Option<SecretValue>,
    version: u64,
    created: DateTime<Utc>,
    deleted: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: SecretValue) -> Self {
        Self {
            value: Some(value),
            version: 1,
            created: Utc::now(),
            deleted: None,
        }
    }

    /// The payload a v2 mount answers reads with.
    fn envelope(&self) -> SecretValue {
        let mut metadata = SecretValue::new();
        metadata.insert("version", self.version as i64);
        metadata.insert("created_time", self.created.to_rfc3339());
        metadata.insert(
            "deletion_time",
            self.deleted.map(|t| t.to_rfc3339()).unwrap_or_default(),
        );
        metadata.insert("destroyed", false);

        let mut payload = SecretValue::new();
        payload.insert(
            DATA_KEY,
            self.value.clone().map(Value::from).unwrap_or(Value::Null),
        );
        payload.insert("metadata", Value::from(metadata));
        payload
    }
}

#[derive(Debug, Default)]
struct State {
    mounts: Vec<Mount>,
    table: MountTable,
    /// Keyed by logical path without a leading separator.
    entries: BTreeMap<String, Entry>,
    failing: Vec<String>,
    fail_mounts: bool,
}

impl State {
    /// Map a physical path to the logical key it addresses.
    ///
    /// v2 mounts only answer under `data/` (values) and `metadata/`
    /// (listings), like the real engine.
    fn locate(&self, physical: &SecretPath, operation: Operation) -> Result<(String, EngineVersion)> {
        let relative = physical.relative();
        let Some(mount) = self.table.resolve(physical).filter(|m| m.version.is_v2()) else {
            let version = self.table.engine(physical);
            return Ok((relative.to_string(), version));
        };

        let rest = relative.strip_prefix(mount.prefix.as_str()).unwrap_or("");
        let segment = match operation {
            Operation::List => "metadata",
            _ => "data",
        };
        let inner = rest
            .strip_prefix(segment)
            .filter(|inner| inner.is_empty() || inner.starts_with(SEPARATOR))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{}: unsupported path for kv v2 {:?} operation",
                    physical, operation
                ))
            })?;

        let key = format!("{}{}", mount.prefix, inner.trim_start_matches(SEPARATOR));
        Ok((key, EngineVersion::V2))
    }

    fn check_failure(&self, physical: &SecretPath, key: &str) -> Result<()> {
        let hit = self.failing.iter().any(|prefix| {
            physical.relative().starts_with(prefix.as_str()) || key.starts_with(prefix.as_str())
        });
        if hit {
            return Err(Error::Transport(format!(
                "connection reset while accessing {}",
                physical
            )));
        }
        Ok(())
    }
}

/// In-memory secret store.
///
/// Emulates the v1 and v2 physical layouts of the mounts it is given,
/// so translation mistakes surface as errors. Counts operations and can
/// inject transport failures. All data is lost on drop.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    state: RwLock<State>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
    mount_fetches: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty store without mounts.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a new empty store with a name used in logs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State::default()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            mount_fetches: AtomicUsize::new(0),
        }
    }

    /// Add a kv mount.
    pub fn with_mount(self, prefix: &str, version: EngineVersion) -> Self {
        {
            let mut state = self.write_state();
            state.mounts.push(Mount::kv(prefix, version));
            state.table = MountTable::new(state.mounts.clone());
        }
        self
    }

    /// Seed a secret at a logical path, bypassing the physical layout.
    pub fn insert(&self, path: &str, value: SecretValue) {
        let key = SecretPath::new(path).relative().to_string();
        self.write_state().entries.insert(key, Entry::new(value));
    }

    /// Current value at a logical path.
    pub fn get(&self, path: &str) -> Option<SecretValue> {
        let key = SecretPath::new(path).relative().to_string();
        self.read_state()
            .entries
            .get(&key)
            .and_then(|e| e.value.clone())
    }

    /// Whether a logical path currently holds a value.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Logical paths currently holding a value.
    pub fn keys(&self) -> Vec<String> {
        self.read_state()
            .entries
            .iter()
            .filter(|(_, e)| e.value.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Fail every operation whose path starts with `prefix`.
    pub fn fail_under(&self, prefix: &str) {
        let prefix = SecretPath::new(prefix).relative().to_string();
        self.write_state().failing.push(prefix);
    }

    /// Make mount listing fail or succeed.
    pub fn fail_mounts(&self, fail: bool) {
        self.write_state().fail_mounts = fail;
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.write_state();
        state.failing.clear();
        state.fail_mounts = false;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn mount_fetches(&self) -> usize {
        self.mount_fetches.load(Ordering::SeqCst)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, path: &SecretPath) -> Result<SecretValue> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.read_state();
        let (key, version) = state.locate(path, Operation::Read)?;
        state.check_failure(path, &key)?;

        let entry = state
            .entries
            .get(&key)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        if version.is_v2() {
            return Ok(entry.envelope());
        }
        entry
            .value
            .clone()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn write(&self, path: &SecretPath, payload: &SecretValue) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write_state();
        let (key, version) = state.locate(path, Operation::Write)?;
        state.check_failure(path, &key)?;

        let value = if version.is_v2() {
            match payload.get(DATA_KEY) {
                Some(Value::Map(map)) => SecretValue::from(map.clone()),
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "{}: no data provided",
                        path
                    )))
                }
            }
        } else {
            payload.clone()
        };

        match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = Some(value);
                entry.version += 1;
                entry.created = Utc::now();
                entry.deleted = None;
            }
            None => {
                state.entries.insert(key, Entry::new(value));
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &SecretPath) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write_state();
        let (key, version) = state.locate(path, Operation::Delete)?;
        state.check_failure(path, &key)?;

        if version.is_v2() {
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.value = None;
                entry.deleted = Some(Utc::now());
            }
        } else {
            state.entries.remove(&key);
        }
        Ok(())
    }

    async fn list(&self, path: &SecretPath) -> Result<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let state = self.read_state();
        let (key, _) = state.locate(path, Operation::List)?;
        state.check_failure(path, &key)?;

        let prefix = if key.is_empty() || key.ends_with(SEPARATOR) {
            key
        } else {
            format!("{}{}", key, SEPARATOR)
        };

        let mut children = BTreeSet::new();
        for stored in state.entries.keys() {
            let Some(rest) = stored.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.find(SEPARATOR) {
                Some(idx) => children.insert(rest[..=idx].to_string()),
                None => children.insert(rest.to_string()),
            };
        }

        if children.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(children.into_iter().collect())
    }

    async fn list_mounts(&self) -> Result<Vec<Mount>> {
        self.mount_fetches.fetch_add(1, Ordering::SeqCst);
        // Lets concurrent callers overlap with an in-flight fetch.
        tokio::task::yield_now().await;
        let state = self.read_state();
        if state.fail_mounts {
            return Err(Error::Transport("mount listing refused".to_string()));
        }
        Ok(state.mounts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(pairs: &[(&str, &str)]) -> SecretValue {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[tokio::test]
    async fn test_v1_write_read() {
        let store = MemoryStore::new();
        let path = SecretPath::new("/app/db");
        store.write(&path, &secret(&[("user", "a")])).await.unwrap();

        assert_eq!(store.read(&path).await.unwrap(), secret(&[("user", "a")]));
        assert_eq!(store.get("app/db"), Some(secret(&[("user", "a")])));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = MemoryStore::new();
        let err = store.read(&SecretPath::new("app/db")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_children() {
        let store = MemoryStore::new();
        store.insert("app/db", secret(&[("k", "v")]));
        store.insert("app/web/key", secret(&[("k", "v")]));
        store.insert("app/web/cert", secret(&[("k", "v")]));
        store.insert("other/x", secret(&[("k", "v")]));

        let names = store.list(&SecretPath::new("app/")).await.unwrap();
        assert_eq!(names, vec!["db".to_string(), "web/".to_string()]);

        let names = store.list(&SecretPath::new("app/web")).await.unwrap();
        assert_eq!(names, vec!["cert".to_string(), "key".to_string()]);

        assert!(store.list(&SecretPath::new("none/")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_v2_layout_is_enforced() {
        let store = MemoryStore::new().with_mount("secret", EngineVersion::V2);
        let payload = secret(&[("user", "a")]);

        // Unwrapped write at the logical path is refused.
        let err = store
            .write(&SecretPath::new("secret/app/db"), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Wrapped write under data/ is accepted.
        let mut wrapped = SecretValue::new();
        wrapped.insert(DATA_KEY, Value::from(payload.clone()));
        store
            .write(&SecretPath::new("secret/data/app/db"), &wrapped)
            .await
            .unwrap();
        assert_eq!(store.get("secret/app/db"), Some(payload.clone()));

        // Listing only answers under metadata/.
        assert!(store.list(&SecretPath::new("secret/app/")).await.is_err());
        assert_eq!(
            store.list(&SecretPath::new("secret/metadata/app/")).await.unwrap(),
            vec!["db".to_string()]
        );

        let read = store.read(&SecretPath::new("secret/data/app/db")).await.unwrap();
        assert_eq!(read.get(DATA_KEY), Some(&Value::from(payload)));
        assert!(read.contains_key("metadata"));
    }

    #[tokio::test]
    async fn test_v2_delete_is_soft() {
        let store = MemoryStore::new().with_mount("secret", EngineVersion::V2);
        store.insert("secret/app/db", secret(&[("user", "a")]));

        store.delete(&SecretPath::new("secret/data/app/db")).await.unwrap();
        assert!(!store.contains("secret/app/db"));

        let read = store.read(&SecretPath::new("secret/data/app/db")).await.unwrap();
        assert_eq!(read.get(DATA_KEY), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.insert("app/db", secret(&[("k", "v")]));
        store.fail_under("/app");

        assert!(store.read(&SecretPath::new("app/db")).await.unwrap_err().is_transport());
        assert!(store.list(&SecretPath::new("app/")).await.unwrap_err().is_transport());

        store.clear_failures();
        assert!(store.read(&SecretPath::new("app/db")).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_mounts() {
        let store = MemoryStore::new()
            .with_mount("secret", EngineVersion::V2)
            .with_mount("legacy", EngineVersion::V1);
        let mounts = store.list_mounts().await.unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(store.mount_fetches(), 1);
    }
}
