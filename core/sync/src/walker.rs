//! Recursive enumeration of secret subtrees.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use vsync_common::{Result, SecretPath, SEPARATOR};
use vsync_storage::KvClient;

/// Enumerates every leaf under a root, one tree level at a time.
///
/// The folders of a level are listed concurrently, at most `concurrency`
/// at once. Any list failure other than an unknown folder aborts the walk.
#[derive(Debug, Clone, Copy)]
pub struct TreeWalker {
    concurrency: usize,
}

impl TreeWalker {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Collect all leaf paths under `root`, sorted.
    ///
    /// # Errors
    /// - The first list error from any folder; no partial result is returned
    pub async fn walk(&self, client: &KvClient, root: &SecretPath) -> Result<Vec<SecretPath>> {
        let mut leaves = Vec::new();
        let mut level = vec![root.as_folder()];
        let mut depth = 0usize;

        while !level.is_empty() {
            debug!(store = client.name(), depth, folders = level.len(), "Listing tree level");

            let listings: Vec<(SecretPath, Vec<String>)> = stream::iter(level)
                .map(|folder| async move {
                    let names = client.list(&folder).await?;
                    Ok::<_, vsync_common::Error>((folder, names))
                })
                .buffer_unordered(self.concurrency)
                .try_collect()
                .await?;

            let mut next = Vec::new();
            for (folder, names) in listings {
                for name in names {
                    let child = folder.join(&name);
                    if name.ends_with(SEPARATOR) {
                        next.push(child);
                    } else {
                        leaves.push(child);
                    }
                }
            }
            level = next;
            depth += 1;
        }

        leaves.sort();
        leaves.dedup();
        debug!(store = client.name(), root = %root, leaves = leaves.len(), "Walk complete");
        Ok(leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vsync_common::{EngineVersion, SecretValue};
    use vsync_storage::MemoryStore;

    fn secret() -> SecretValue {
        vec![("k", "v")].into_iter().collect()
    }

    fn paths(leaves: &[SecretPath]) -> Vec<&str> {
        leaves.iter().map(|p| p.as_str()).collect()
    }

    #[tokio::test]
    async fn test_walk_visits_every_leaf_once() {
        let store = Arc::new(MemoryStore::new());
        let known = [
            "app/db",
            "app/web/cert",
            "app/web/key",
            "app/web/tls/ca",
            "app/zeta",
        ];
        for path in known {
            store.insert(path, secret());
        }
        store.insert("other/x", secret());

        let client = KvClient::new(store);
        let leaves = TreeWalker::new(2).walk(&client, &SecretPath::new("app")).await.unwrap();

        assert_eq!(leaves.len(), known.len());
        assert_eq!(paths(&leaves), known.to_vec());
    }

    #[tokio::test]
    async fn test_walk_keeps_leading_separator() {
        let store = Arc::new(MemoryStore::new());
        store.insert("app/db", secret());

        let client = KvClient::new(store);
        let leaves = TreeWalker::new(4).walk(&client, &SecretPath::new("/app/")).await.unwrap();
        assert_eq!(paths(&leaves), vec!["/app/db"]);
    }

    #[tokio::test]
    async fn test_walk_v2_uses_metadata_listing() {
        let store = Arc::new(MemoryStore::new().with_mount("secret", EngineVersion::V2));
        store.insert("secret/app/db", secret());
        store.insert("secret/app/web/key", secret());

        let client = KvClient::new(store.clone());
        let leaves = TreeWalker::new(8).walk(&client, &SecretPath::new("secret")).await.unwrap();
        assert_eq!(paths(&leaves), vec!["secret/app/db", "secret/app/web/key"]);
        assert!(store.lists() >= 3);
    }

    #[tokio::test]
    async fn test_walk_empty_root() {
        let client = KvClient::new(Arc::new(MemoryStore::new()));
        let leaves = TreeWalker::new(1).walk(&client, &SecretPath::new("none")).await.unwrap();
        assert!(leaves.is_empty());
    }

    #[tokio::test]
    async fn test_walk_fails_on_subtree_error() {
        let store = Arc::new(MemoryStore::new());
        store.insert("app/db", secret());
        store.insert("app/web/key", secret());
        store.fail_under("app/web");

        let client = KvClient::new(store);
        let err = TreeWalker::new(4).walk(&client, &SecretPath::new("app")).await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("app/web"));
    }
}
