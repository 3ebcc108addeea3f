//! Per-leaf sync state and run reports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use vsync_common::{Error, SecretPath};

use crate::diff::KeyChanges;

/// Sync status for a single leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing read yet.
    Unsynced,
    /// Source and destination read and compared.
    Compared,
    /// Destination already holds the source value.
    UpToDate,
    /// Destination was written.
    Written,
    /// A write was needed but not issued (dry run).
    WouldWrite,
    /// Listed on the source but without a current value.
    Skipped,
    /// Sync failed.
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SyncStatus::Unsynced | SyncStatus::Compared)
    }

    /// Whether the state machine allows moving to `next`.
    pub fn can_become(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Unsynced, Compared)
                | (Unsynced, Skipped)
                | (Unsynced, Failed)
                | (Compared, UpToDate)
                | (Compared, Written)
                | (Compared, WouldWrite)
                | (Compared, Failed)
        )
    }
}

/// Tracks one leaf through a sync.
#[derive(Debug, Clone, Serialize)]
pub struct LeafSync {
    pub path: SecretPath,
    pub status: SyncStatus,
    /// Keys that differed at comparison time.
    #[serde(skip_serializing_if = "KeyChanges::is_empty")]
    pub changes: KeyChanges,
    /// Physical path written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_to: Option<SecretPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LeafSync {
    pub fn new(path: SecretPath) -> Self {
        Self {
            path,
            status: SyncStatus::Unsynced,
            changes: KeyChanges::default(),
            written_to: None,
            error: None,
        }
    }

    fn advance(&mut self, next: SyncStatus) {
        debug_assert!(
            self.status.can_become(next),
            "invalid transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }

    /// Mark as compared, recording which keys differ.
    pub fn mark_compared(&mut self, changes: KeyChanges) {
        self.changes = changes;
        self.advance(SyncStatus::Compared);
    }

    pub fn mark_up_to_date(&mut self) {
        self.advance(SyncStatus::UpToDate);
    }

    /// Mark as written to the given physical path.
    pub fn mark_written(&mut self, physical: SecretPath) {
        self.written_to = Some(physical);
        self.advance(SyncStatus::Written);
    }

    pub fn mark_would_write(&mut self) {
        self.advance(SyncStatus::WouldWrite);
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.advance(SyncStatus::Skipped);
    }

    /// Mark as failed. Allowed from any non-terminal state.
    pub fn mark_failed(&mut self, error: &Error) {
        self.error = Some(error.to_string());
        self.advance(SyncStatus::Failed);
    }
}

/// A path and the error that stopped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPath {
    pub path: SecretPath,
    pub error: String,
}

impl FailedPath {
    pub fn new(path: SecretPath, error: impl Into<String>) -> Self {
        Self {
            path,
            error: error.into(),
        }
    }
}

/// Summary of a subtree sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub entrypoint: String,
    pub dry_run: bool,
    /// Leaves found on the source.
    pub total: usize,
    pub up_to_date: usize,
    pub written: usize,
    pub would_write: usize,
    pub skipped: Vec<SecretPath>,
    pub failed: Vec<FailedPath>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new(entrypoint: &SecretPath, dry_run: bool) -> Self {
        Self {
            entrypoint: entrypoint.to_string(),
            dry_run,
            ..Default::default()
        }
    }

    /// Count a finished leaf.
    pub fn record(&mut self, leaf: &LeafSync) {
        match leaf.status {
            SyncStatus::UpToDate => self.up_to_date += 1,
            SyncStatus::Written => self.written += 1,
            SyncStatus::WouldWrite => self.would_write += 1,
            SyncStatus::Skipped => self.skipped.push(leaf.path.clone()),
            SyncStatus::Failed => self.failed.push(FailedPath::new(
                leaf.path.clone(),
                leaf.error.clone().unwrap_or_default(),
            )),
            SyncStatus::Unsynced | SyncStatus::Compared => {}
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Count leaves by terminal status.
    pub fn count_by_status(&self) -> HashMap<SyncStatus, usize> {
        HashMap::from([
            (SyncStatus::UpToDate, self.up_to_date),
            (SyncStatus::Written, self.written),
            (SyncStatus::WouldWrite, self.would_write),
            (SyncStatus::Skipped, self.skipped.len()),
            (SyncStatus::Failed, self.failed.len()),
        ])
    }
}

/// Result of checking whether a destination leaf exists on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "cause", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Present,
    /// Not found, or soft-deleted.
    ConfirmedAbsent,
    /// The probe could not decide; the path must not be deleted.
    ProbeFailed(String),
}

/// Summary of an orphan reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanReport {
    pub entrypoint: String,
    pub dry_run: bool,
    /// Destination leaves examined.
    pub scanned: usize,
    /// Confirmed orphans, in listing order.
    pub orphans: Vec<SecretPath>,
    /// Orphans actually deleted. Empty in a dry run.
    pub deleted: Vec<SecretPath>,
    pub probe_failures: Vec<FailedPath>,
    pub delete_failures: Vec<FailedPath>,
}

impl OrphanReport {
    pub fn new(entrypoint: &SecretPath, dry_run: bool) -> Self {
        Self {
            entrypoint: entrypoint.to_string(),
            dry_run,
            ..Default::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.probe_failures.is_empty() || !self.delete_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_lifecycle() {
        let mut leaf = LeafSync::new(SecretPath::new("app/db"));
        assert_eq!(leaf.status, SyncStatus::Unsynced);
        assert!(!leaf.status.is_terminal());

        leaf.mark_compared(KeyChanges::default());
        leaf.mark_written(SecretPath::new("secret/data/app/db"));
        assert_eq!(leaf.status, SyncStatus::Written);
        assert!(leaf.status.is_terminal());
        assert_eq!(leaf.written_to.as_ref().map(|p| p.as_str()), Some("secret/data/app/db"));
    }

    #[test]
    fn test_transitions() {
        assert!(SyncStatus::Unsynced.can_become(SyncStatus::Compared));
        assert!(SyncStatus::Compared.can_become(SyncStatus::WouldWrite));
        assert!(!SyncStatus::Unsynced.can_become(SyncStatus::Written));
        assert!(!SyncStatus::Written.can_become(SyncStatus::Compared));
        assert!(!SyncStatus::UpToDate.can_become(SyncStatus::Failed));
    }

    #[test]
    fn test_report_counts() {
        let mut report = SyncReport::new(&SecretPath::new("app"), false);

        let mut written = LeafSync::new(SecretPath::new("app/a"));
        written.mark_compared(KeyChanges::default());
        written.mark_written(SecretPath::new("app/a"));
        report.record(&written);

        let mut failed = LeafSync::new(SecretPath::new("app/b"));
        failed.mark_failed(&Error::Transport("boom".to_string()));
        report.record(&failed);

        let mut skipped = LeafSync::new(SecretPath::new("app/c"));
        skipped.mark_skipped("no current value");
        report.record(&skipped);

        assert_eq!(report.written, 1);
        assert!(report.has_failures());
        assert_eq!(report.failed[0].path.as_str(), "app/b");
        assert_eq!(report.count_by_status()[&SyncStatus::Skipped], 1);
    }

    #[test]
    fn test_report_serialization() {
        let mut report = SyncReport::new(&SecretPath::new("/secret"), true);
        report.would_write = 2;
        report.finish(Duration::from_millis(42));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entrypoint"], "/secret");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["would_write"], 2);
        assert_eq!(json["duration_ms"], 42);
    }

    #[test]
    fn test_probe_outcome_serialization() {
        let json = serde_json::to_value(ProbeOutcome::ProbeFailed("timeout".to_string())).unwrap();
        assert_eq!(json["outcome"], "probe_failed");
        assert_eq!(json["cause"], "timeout");
    }
}
