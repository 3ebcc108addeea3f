//! Removal of destination secrets that no longer exist on the source.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use vsync_common::{Error, Result, SecretPath};
use vsync_storage::KvClient;

use crate::engine::SyncConfig;
use crate::state::{FailedPath, OrphanReport, ProbeOutcome};

/// Finds and deletes destination-only secrets under an entrypoint.
///
/// The destination listing is snapshotted before any probe or delete, and
/// a leaf is deleted only when the source confirms it absent.
pub struct OrphanReconciler {
    source: Arc<KvClient>,
    destination: Arc<KvClient>,
    config: SyncConfig,
}

impl OrphanReconciler {
    pub fn new(source: Arc<KvClient>, destination: Arc<KvClient>, config: SyncConfig) -> Self {
        Self {
            source,
            destination,
            config,
        }
    }

    /// Check whether a path holds a current value on the source.
    pub async fn probe(&self, path: &SecretPath) -> ProbeOutcome {
        match self.source.read(path).await {
            Ok(Some(_)) => ProbeOutcome::Present,
            Ok(None) => ProbeOutcome::ConfirmedAbsent,
            Err(err) if err.is_not_found() => ProbeOutcome::ConfirmedAbsent,
            Err(err) => ProbeOutcome::ProbeFailed(err.to_string()),
        }
    }

    /// Probe one destination leaf.
    ///
    /// A confirmed orphan that has no current value on the destination
    /// (already soft-deleted) is reported as present so it is left alone.
    async fn classify(&self, path: &SecretPath) -> ProbeOutcome {
        let outcome = self.probe(path).await;
        if outcome != ProbeOutcome::ConfirmedAbsent {
            return outcome;
        }
        match self.destination.read(path).await {
            Ok(Some(_)) => ProbeOutcome::ConfirmedAbsent,
            Ok(None) => {
                debug!(path = %path, "Destination secret already deleted");
                ProbeOutcome::Present
            }
            Err(err) => ProbeOutcome::ProbeFailed(format!("destination: {}", err)),
        }
    }

    /// Find orphans under `entrypoint` and delete them unless `dry_run`.
    ///
    /// # Errors
    /// - Destination walk failures
    /// - Any probe failure, before anything is deleted, unless failures
    ///   are tolerated
    /// - The first delete failure, unless failures are tolerated
    pub async fn run(&self, entrypoint: &SecretPath, dry_run: bool) -> Result<OrphanReport> {
        info!(entrypoint = %entrypoint, dry_run, "Looking for orphaned secrets");
        let snapshot = self.config.walker().walk(&self.destination, entrypoint).await?;

        let mut report = OrphanReport::new(entrypoint, dry_run);
        report.scanned = snapshot.len();

        let probes: Vec<(SecretPath, ProbeOutcome)> = stream::iter(snapshot)
            .map(|path| async move {
                let outcome = self.classify(&path).await;
                (path, outcome)
            })
            .buffered(self.config.concurrency())
            .collect()
            .await;

        for (path, outcome) in probes {
            match outcome {
                ProbeOutcome::Present => {}
                ProbeOutcome::ConfirmedAbsent => report.orphans.push(path),
                ProbeOutcome::ProbeFailed(cause) => {
                    warn!(path = %path, cause = %cause, "Could not confirm orphan, keeping it");
                    report.probe_failures.push(FailedPath::new(path, cause));
                }
            }
        }

        if let Some(first) = report.probe_failures.first() {
            if !self.config.tolerate_failures {
                return Err(Error::Transport(format!(
                    "{} source probe(s) failed, nothing deleted; first {}: {}",
                    report.probe_failures.len(),
                    first.path,
                    first.error
                )));
            }
        }

        if dry_run {
            for path in &report.orphans {
                warn!(path = %path, "Dry run: would delete orphan");
            }
            info!(orphans = report.orphans.len(), "Dry run complete");
            return Ok(report);
        }

        self.delete_orphans(&mut report).await?;
        info!(
            orphans = report.orphans.len(),
            deleted = report.deleted.len(),
            failed = report.delete_failures.len(),
            "Orphan removal complete"
        );
        Ok(report)
    }

    async fn delete_orphans(&self, report: &mut OrphanReport) -> Result<()> {
        let orphans = report.orphans.clone();
        let mut deletes = stream::iter(orphans)
            .map(|path| async move {
                let outcome = self.destination.delete(&path).await;
                (path, outcome)
            })
            .buffered(self.config.concurrency());

        while let Some((path, outcome)) = deletes.next().await {
            match outcome {
                Ok(physical) => {
                    info!(path = %path, physical = %physical, "Deleted orphan");
                    report.deleted.push(path);
                }
                Err(err) if self.config.tolerate_failures => {
                    error!(path = %path, error = %err, "Failed to delete orphan");
                    report.delete_failures.push(FailedPath::new(path, err.to_string()));
                }
                Err(err) => {
                    error!(path = %path, error = %err, "Failed to delete orphan, aborting");
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}
