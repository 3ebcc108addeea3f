//! Core sync engine that copies secrets from source to destination.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use vsync_common::{Error, Result, SecretPath, SecretValue};
use vsync_storage::KvClient;

use crate::diff::{changed_keys, needs_write};
use crate::state::{LeafSync, SyncReport};
use crate::walker::TreeWalker;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of requests in flight per step.
    pub concurrency: usize,
    /// Record failed leaves and keep going instead of aborting.
    pub tolerate_failures: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            tolerate_failures: false,
        }
    }
}

impl SyncConfig {
    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn walker(&self) -> TreeWalker {
        TreeWalker::new(self.concurrency())
    }
}

/// Read-compare-write of one value against a store.
///
/// Writes only when the stored value differs. In a dry run the needed
/// write is reported as [`crate::SyncStatus::WouldWrite`] and not issued.
///
/// # Errors
/// - Read or write errors from the store
pub async fn write_if_changed(
    client: &KvClient,
    path: &SecretPath,
    value: &SecretValue,
    dry_run: bool,
) -> Result<LeafSync> {
    let mut leaf = LeafSync::new(path.clone());
    let existing = client.read(path).await?;
    leaf.mark_compared(changed_keys(value, existing.as_ref()));

    if !needs_write(value, existing.as_ref()) {
        debug!(store = client.name(), path = %path, "Up to date");
        leaf.mark_up_to_date();
        return Ok(leaf);
    }

    let keys = leaf.changes.keys().join(",");
    if dry_run {
        warn!(store = client.name(), path = %path, keys = %keys, "Dry run: skipping write");
        leaf.mark_would_write();
        return Ok(leaf);
    }

    let physical = client.write(path, value).await?;
    info!(store = client.name(), path = %path, physical = %physical, keys = %keys, "Wrote secret");
    leaf.mark_written(physical);
    Ok(leaf)
}

/// Copies secrets from a source client to a destination client.
pub struct SyncEngine {
    source: Arc<KvClient>,
    destination: Arc<KvClient>,
    config: SyncConfig,
    dry_run: bool,
}

impl SyncEngine {
    pub fn new(
        source: Arc<KvClient>,
        destination: Arc<KvClient>,
        config: SyncConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            source,
            destination,
            config,
            dry_run,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync a single secret.
    ///
    /// # Errors
    /// - `SourceSecretMissing` if the source has no current value at `path`
    /// - Any read or write error, unretried
    pub async fn sync_one(&self, path: &SecretPath) -> Result<LeafSync> {
        let value = self
            .source
            .read(path)
            .await?
            .ok_or_else(|| Error::SourceSecretMissing(path.to_string()))?;
        write_if_changed(&self.destination, path, &value, self.dry_run).await
    }

    /// Sync one listed leaf as part of a batch.
    ///
    /// A listed leaf without a current value (soft-deleted on a v2 mount)
    /// is skipped rather than failing the batch.
    async fn sync_listed(&self, path: &SecretPath) -> Result<LeafSync> {
        let Some(value) = self.source.read(path).await? else {
            warn!(store = self.source.name(), path = %path, "Listed secret has no current value, skipping");
            let mut leaf = LeafSync::new(path.clone());
            leaf.mark_skipped("no current value on source");
            return Ok(leaf);
        };
        write_if_changed(&self.destination, path, &value, self.dry_run).await
    }

    /// Sync every leaf under `entrypoint`.
    ///
    /// Leaves are synced concurrently. The first failure aborts the run
    /// unless `tolerate_failures` is set, in which case it is recorded.
    ///
    /// # Errors
    /// - Walk failures, always
    /// - The first leaf failure, unless failures are tolerated
    pub async fn sync_all(&self, entrypoint: &SecretPath) -> Result<SyncReport> {
        let start = Instant::now();
        info!(entrypoint = %entrypoint, dry_run = self.dry_run, "Starting sync");

        let leaves = self.config.walker().walk(&self.source, entrypoint).await?;
        let mut report = SyncReport::new(entrypoint, self.dry_run);
        report.total = leaves.len();
        debug!(count = leaves.len(), "Source leaves enumerated");

        let mut results = stream::iter(leaves)
            .map(|path| async move {
                let outcome = self.sync_listed(&path).await;
                (path, outcome)
            })
            .buffer_unordered(self.config.concurrency());

        while let Some((path, outcome)) = results.next().await {
            match outcome {
                Ok(leaf) => report.record(&leaf),
                Err(err) if self.config.tolerate_failures => {
                    error!(path = %path, error = %err, "Failed to sync secret");
                    let mut leaf = LeafSync::new(path);
                    leaf.mark_failed(&err);
                    report.record(&leaf);
                }
                Err(err) => {
                    error!(path = %path, error = %err, "Failed to sync secret, aborting");
                    return Err(err);
                }
            }
        }

        report.finish(start.elapsed());
        info!(
            "Sync completed in {:?}: {} written, {} would write, {} up to date, {} skipped, {} failed",
            start.elapsed(),
            report.written,
            report.would_write,
            report.up_to_date,
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
