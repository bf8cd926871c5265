// ============================================================================
// Config History Library
// ============================================================================

pub mod config;
pub mod core;
pub mod lifecycle;
pub mod query;
pub mod retention;
pub mod storage;

// Re-export main types for convenience
pub use crate::config::HistoryConfig;
pub use crate::core::{Actor, HistoryError, Operation, Result, Revision, RevisionInfo};
pub use crate::lifecycle::{ConfigEvent, HistoryListener, HistoryRecorder};
pub use crate::query::{ChangeBadge, ChangeSinceBuildQuery, ConfigChange, DiffAddress, DiffLink};
pub use crate::retention::{PruneFailure, PruneReport, PrunedRevision, RetentionPolicy};
pub use crate::storage::{
    RevisionId, RevisionIdentifier, RevisionListing, RevisionStore, SweepReport,
};
