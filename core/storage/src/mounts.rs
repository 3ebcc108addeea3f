//! Mount table and per-session mount resolution.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use vsync_common::{EngineVersion, Result, SecretPath, SEPARATOR};

use crate::provider::{Mount, SecretStore};

/// Longest-prefix-match table over mount prefixes of any depth.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    /// Sorted by descending prefix length so the first hit is the longest.
    mounts: Vec<Mount>,
}

impl MountTable {
    /// Build a table from the mounts reported by a backend.
    pub fn new(mut mounts: Vec<Mount>) -> Self {
        mounts.retain(|m| !m.prefix.is_empty());
        mounts.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        mounts.dedup_by(|a, b| a.prefix == b.prefix);
        Self { mounts }
    }

    /// Find the mount owning a path.
    pub fn resolve(&self, path: &SecretPath) -> Option<&Mount> {
        let relative = path.relative().trim_end_matches(SEPARATOR);
        if relative.is_empty() {
            return None;
        }
        let probe = format!("{}{}", relative, SEPARATOR);
        self.mounts.iter().find(|m| probe.starts_with(&m.prefix))
    }

    /// Engine version for a path; `Unknown` when no mount matches.
    pub fn engine(&self, path: &SecretPath) -> EngineVersion {
        self.resolve(path)
            .map(|m| m.version)
            .unwrap_or(EngineVersion::Unknown)
    }

    /// All mounts, longest prefix first.
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

/// Outcome of resolving a path against a mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    /// Prefix of the owning mount, if any.
    pub prefix: Option<String>,
    /// Engine version governing the physical layout.
    pub version: EngineVersion,
}

impl ResolvedMount {
    /// No mount matched.
    pub fn unresolved() -> Self {
        Self {
            prefix: None,
            version: EngineVersion::Unknown,
        }
    }

    pub fn from_mount(mount: &Mount) -> Self {
        Self {
            prefix: Some(mount.prefix.clone()),
            version: mount.version,
        }
    }
}

/// Resolves paths to mounts, fetching the mount table at most once.
///
/// Concurrent first callers share a single fetch. A failed fetch is not
/// cached; the next caller tries again.
pub struct MountResolver {
    store: Arc<dyn SecretStore>,
    table: OnceCell<MountTable>,
}

impl MountResolver {
    /// Create a resolver that fetches lazily from the store.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            table: OnceCell::new(),
        }
    }

    /// Create a resolver with an already known table.
    pub fn with_table(store: Arc<dyn SecretStore>, table: MountTable) -> Self {
        Self {
            store,
            table: OnceCell::new_with(Some(table)),
        }
    }

    /// Get the mount table, fetching it on first use.
    ///
    /// # Errors
    /// - Communication errors from the store are returned as is
    pub async fn table(&self) -> Result<&MountTable> {
        self.table
            .get_or_try_init(|| async {
                let mounts = self.store.list_mounts().await?;
                debug!(store = self.store.name(), count = mounts.len(), "Fetched mount table");
                Ok::<_, vsync_common::Error>(MountTable::new(mounts))
            })
            .await
    }

    /// Resolve the mount owning a path.
    pub async fn resolve(&self, path: &SecretPath) -> Result<ResolvedMount> {
        let table = self.table().await?;
        let resolved = table
            .resolve(path)
            .map(ResolvedMount::from_mount)
            .unwrap_or_else(ResolvedMount::unresolved);
        debug!(
            store = self.store.name(),
            path = %path,
            engine = %resolved.version,
            "Resolved mount"
        );
        Ok(resolved)
    }

    /// Engine version of the mount owning a path.
    pub async fn resolve_engine(&self, path: &SecretPath) -> Result<EngineVersion> {
        Ok(self.resolve(path).await?.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn table() -> MountTable {
        MountTable::new(vec![
            Mount::kv("secret", EngineVersion::V2),
            Mount::kv("team/a", EngineVersion::V1),
            Mount::kv("team", EngineVersion::V2),
            Mount::new("sys", "system", EngineVersion::Unknown),
        ])
    }

    #[test]
    fn test_resolve_single_segment() {
        let table = table();
        let mount = table.resolve(&SecretPath::new("/secret/app/db")).unwrap();
        assert_eq!(mount.prefix, "secret/");
        assert_eq!(table.engine(&SecretPath::new("secret")), EngineVersion::V2);
    }

    #[test]
    fn test_resolve_longest_prefix_wins() {
        let table = table();
        assert_eq!(table.engine(&SecretPath::new("team/a/db")), EngineVersion::V1);
        assert_eq!(table.engine(&SecretPath::new("team/b/db")), EngineVersion::V2);
        assert_eq!(table.resolve(&SecretPath::new("team/a/")).unwrap().prefix, "team/a/");
    }

    #[test]
    fn test_resolve_respects_segment_boundary() {
        let table = table();
        assert!(table.resolve(&SecretPath::new("secretive/app")).is_none());
        assert_eq!(table.engine(&SecretPath::new("other/x")), EngineVersion::Unknown);
        assert!(table.resolve(&SecretPath::new("/")).is_none());
    }

    #[tokio::test]
    async fn test_resolver_fetches_once() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        let resolver = MountResolver::new(store.clone());

        for _ in 0..3 {
            let engine = resolver
                .resolve_engine(&SecretPath::new("secret/x"))
                .await
                .unwrap();
            assert_eq!(engine, EngineVersion::V2);
        }
        assert_eq!(store.mount_fetches(), 1);
    }

    #[tokio::test]
    async fn test_resolver_concurrent_callers_share_fetch() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        let resolver = MountResolver::new(store.clone());
        let paths: Vec<SecretPath> = (0..8)
            .map(|i| SecretPath::new(format!("secret/app{}", i)))
            .collect();

        let engines = futures::future::join_all(
            paths.iter().map(|path| resolver.resolve_engine(path)),
        )
        .await;

        assert_eq!(engines.len(), 8);
        for engine in engines {
            assert_eq!(engine.unwrap(), EngineVersion::V2);
        }
        assert_eq!(store.mount_fetches(), 1);
    }

    #[tokio::test]
    async fn test_resolver_reports_fetch_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_mounts(true);
        let resolver = MountResolver::new(store.clone());

        let err = resolver.resolve(&SecretPath::new("secret/x")).await.unwrap_err();
        assert!(err.is_transport());

        store.fail_mounts(false);
        let resolved = resolver.resolve(&SecretPath::new("secret/x")).await.unwrap();
        assert_eq!(resolved, ResolvedMount::unresolved());
    }

    #[tokio::test]
    async fn test_resolver_with_table_skips_fetch() {
        let store = Arc::new(MemoryStore::new());
        let resolver = MountResolver::with_table(store.clone(), table());
        assert_eq!(
            resolver.resolve_engine(&SecretPath::new("secret/x")).await.unwrap(),
            EngineVersion::V2
        );
        assert_eq!(store.mount_fetches(), 0);
    }
}
