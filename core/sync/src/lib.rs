//! vsync reconciliation engine
//!
//! One-way synchronization of a secret subtree from a source store to a
//! destination store:
//! - Bounded-concurrency tree enumeration
//! - Structural diffing, writing only what changed
//! - Orphan detection that never deletes on an inconclusive probe
//! - Dry-run reporting for every destructive step

pub mod diff;
pub mod engine;
pub mod orphans;
pub mod session;
pub mod state;
pub mod walker;

pub use diff::{changed_keys, needs_write, structurally_equal, KeyChanges};
pub use engine::{write_if_changed, SyncConfig, SyncEngine};
pub use orphans::OrphanReconciler;
pub use session::SyncSession;
pub use state::{FailedPath, LeafSync, OrphanReport, ProbeOutcome, SyncReport, SyncStatus};
pub use walker::TreeWalker;
