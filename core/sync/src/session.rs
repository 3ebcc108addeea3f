//! A source/destination pairing for one invocation.

use std::sync::Arc;

use vsync_common::{Result, SecretPath};
use vsync_storage::KvClient;

use crate::engine::{SyncConfig, SyncEngine};
use crate::orphans::OrphanReconciler;
use crate::state::{LeafSync, OrphanReport, SyncReport};

/// Binds two clients, an entrypoint and a dry-run flag.
///
/// Each client owns its mount table cache, so the tables are fetched at
/// most once per session. Nothing is persisted.
pub struct SyncSession {
    source: Arc<KvClient>,
    destination: Arc<KvClient>,
    entrypoint: SecretPath,
    dry_run: bool,
    config: SyncConfig,
}

impl SyncSession {
    pub fn new(
        source: Arc<KvClient>,
        destination: Arc<KvClient>,
        entrypoint: SecretPath,
        dry_run: bool,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            destination,
            entrypoint,
            dry_run,
            config,
        }
    }

    pub fn source(&self) -> &Arc<KvClient> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<KvClient> {
        &self.destination
    }

    pub fn entrypoint(&self) -> &SecretPath {
        &self.entrypoint
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.source.clone(),
            self.destination.clone(),
            self.config.clone(),
            self.dry_run,
        )
    }

    pub fn reconciler(&self) -> OrphanReconciler {
        OrphanReconciler::new(
            self.source.clone(),
            self.destination.clone(),
            self.config.clone(),
        )
    }

    /// Sync one secret at `path`.
    pub async fn sync_one(&self, path: &SecretPath) -> Result<LeafSync> {
        self.engine().sync_one(path).await
    }

    /// Sync the whole entrypoint subtree.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        self.engine().sync_all(&self.entrypoint).await
    }

    /// Remove destination secrets under the entrypoint that the source
    /// no longer has.
    pub async fn remove_orphans(&self) -> Result<OrphanReport> {
        self.reconciler().run(&self.entrypoint, self.dry_run).await
    }
}
