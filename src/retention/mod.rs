//! Retention rules for revision logs.
//!
//! Pruning is best-effort: each pass takes one listing of the entity at its
//! start and deletes victims chosen from that listing only. Revisions
//! appended while the pass runs are newer than everything in the listing and
//! are never touched. A victim that cannot be deleted is reported and the
//! pass moves on to the next one.

use crate::config::HistoryConfig;
use crate::core::{HistoryError, RevisionInfo};
use crate::storage::{RevisionId, RevisionStore};
use chrono::{DateTime, Duration, Utc};
use log::warn;
use tracing::{Level, event, info_span};

// ============================================================================
// Prune Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedRevision {
    pub entity: String,
    pub identifier: RevisionId,
}

/// A victim that could not be removed, or an entity that could not be listed
/// (`identifier` is `None`).
#[derive(Debug)]
pub struct PruneFailure {
    pub entity: String,
    pub identifier: Option<RevisionId>,
    pub error: HistoryError,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    /// Readable revisions seen across all listings of the pass.
    pub examined: usize,
    pub removed: Vec<PrunedRevision>,
    pub failures: Vec<PruneFailure>,
    /// Staging and trash leftovers deleted by a store-wide pass.
    pub leftovers_removed: usize,
}

impl PruneReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: PruneReport) {
        self.examined += other.examined;
        self.removed.extend(other.removed);
        self.failures.extend(other.failures);
        self.leftovers_removed += other.leftovers_removed;
    }
}

// ============================================================================
// Retention Policy
// ============================================================================

/// How much history each entity keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Newest revisions kept per entity; zero or negative keeps everything.
    max_entries: i64,
    /// Revisions older than this many days are dropped, except the newest.
    max_age_days: Option<u32>,
}

impl RetentionPolicy {
    pub fn new(max_entries: i64) -> Self {
        Self {
            max_entries,
            max_age_days: None,
        }
    }

    /// Keeps everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_age_days: config.max_age_days,
        }
    }

    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    pub fn max_entries(&self) -> i64 {
        self.max_entries
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0 || self.max_age_days.is_some()
    }

    /// Applies every configured rule to one entity.
    pub fn apply(&self, store: &RevisionStore, entity: &str) -> PruneReport {
        self.apply_at(store, entity, Utc::now())
    }

    pub fn apply_at(&self, store: &RevisionStore, entity: &str, now: DateTime<Utc>) -> PruneReport {
        let mut report = Self::prune(store, entity, self.max_entries);
        if let Some(days) = self.max_age_days {
            let cutoff = now - Duration::days(i64::from(days));
            report.merge(Self::prune_older_than(store, entity, cutoff));
        }
        report
    }

    /// Applies every configured rule to every entity in the store, after
    /// clearing leftovers of interrupted writes.
    pub fn apply_all(&self, store: &RevisionStore) -> PruneReport {
        let mut report = PruneReport::default();
        if !self.is_enabled() {
            return report;
        }

        match store.sweep_leftovers() {
            Ok(sweep) => report.leftovers_removed = sweep.removed.len(),
            Err(err) => warn!("retention sweep could not clear leftovers: {}", err),
        }

        let entities = match store.entities() {
            Ok(entities) => entities,
            Err(err) => {
                warn!("retention sweep could not list entities: {}", err);
                report.failures.push(PruneFailure {
                    entity: String::new(),
                    identifier: None,
                    error: err,
                });
                return report;
            }
        };

        let now = Utc::now();
        for entity in entities {
            report.merge(self.apply_at(store, &entity, now));
        }
        event!(
            Level::INFO,
            removed = report.removed.len(),
            failures = report.failures.len(),
            "retention sweep finished"
        );
        report
    }

    /// Deletes the oldest revisions of `entity` until at most `max_entries`
    /// remain. Does nothing when `max_entries <= 0`.
    pub fn prune(store: &RevisionStore, entity: &str, max_entries: i64) -> PruneReport {
        if max_entries <= 0 {
            return PruneReport::default();
        }

        let span = info_span!("history.prune", entity = %entity, max_entries);
        let _enter = span.enter();

        let (revisions, mut report) = match snapshot(store, entity) {
            Ok(snapshot) => snapshot,
            Err(report) => return report,
        };

        let keep = usize::try_from(max_entries).unwrap_or(usize::MAX);
        if revisions.len() <= keep {
            return report;
        }

        let excess = revisions.len() - keep;
        remove_victims(store, entity, &revisions[..excess], &mut report);
        report
    }

    /// Deletes revisions of `entity` stamped before `cutoff`. The newest
    /// revision is always kept, however old it is.
    pub fn prune_older_than(store: &RevisionStore, entity: &str, cutoff: DateTime<Utc>) -> PruneReport {
        let span = info_span!("history.prune_age", entity = %entity, cutoff = %cutoff);
        let _enter = span.enter();

        let (revisions, mut report) = match snapshot(store, entity) {
            Ok(snapshot) => snapshot,
            Err(report) => return report,
        };

        let Some((_newest, older)) = revisions.split_last() else {
            return report;
        };
        let expired = older.partition_point(|info| info.timestamp < cutoff);
        remove_victims(store, entity, &older[..expired], &mut report);
        report
    }
}

/// One consistent listing of `entity` for a pass.
fn snapshot(
    store: &RevisionStore,
    entity: &str,
) -> std::result::Result<(Vec<RevisionInfo>, PruneReport), PruneReport> {
    match store.list(entity) {
        Ok(revisions) => {
            let report = PruneReport {
                examined: revisions.len(),
                ..PruneReport::default()
            };
            Ok((revisions, report))
        }
        Err(err) => {
            warn!("retention could not list entity '{}': {}", entity, err);
            Err(PruneReport {
                failures: vec![PruneFailure {
                    entity: entity.to_string(),
                    identifier: None,
                    error: err,
                }],
                ..PruneReport::default()
            })
        }
    }
}

fn remove_victims(
    store: &RevisionStore,
    entity: &str,
    victims: &[RevisionInfo],
    report: &mut PruneReport,
) {
    for victim in victims {
        match store.remove(entity, &victim.identifier) {
            Ok(()) => report.removed.push(PrunedRevision {
                entity: entity.to_string(),
                identifier: victim.identifier.clone(),
            }),
            // Already gone, most likely removed by a concurrent pass.
            Err(HistoryError::NotFound(_)) => {}
            Err(err) => {
                warn!(
                    "retention could not delete revision: entity='{}' revision='{}' error='{}'",
                    entity, victim.identifier, err
                );
                report.failures.push(PruneFailure {
                    entity: entity.to_string(),
                    identifier: Some(victim.identifier.clone()),
                    error: HistoryError::RetentionError(err.to_string()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Actor, Operation};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 11, d, 12, 0, 0).unwrap()
    }

    fn seeded(store: &RevisionStore, entity: &str, days: &[u32]) {
        for &d in days {
            store
                .append_at(entity, Operation::Changed, &Actor::anonymous(), b"cfg", None, day(d))
                .unwrap();
        }
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "Test1", &[1, 2, 3, 4, 5]);

        let report = RetentionPolicy::prune(&store, "Test1", 2);
        assert_eq!(report.removed_count(), 3);
        assert!(report.is_clean());

        let remaining: Vec<_> = store
            .list("Test1")
            .unwrap()
            .into_iter()
            .map(|info| info.timestamp)
            .collect();
        assert_eq!(remaining, vec![day(4), day(5)]);
    }

    #[test]
    fn test_prune_disabled_for_non_positive_limit() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "Test1", &[1, 2, 3]);

        assert_eq!(RetentionPolicy::prune(&store, "Test1", 0).removed_count(), 0);
        assert_eq!(RetentionPolicy::prune(&store, "Test1", -5).removed_count(), 0);
        assert_eq!(store.list("Test1").unwrap().len(), 3);
    }

    #[test]
    fn test_prune_older_than_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "Test1", &[1, 2, 3]);

        let report = RetentionPolicy::prune_older_than(&store, "Test1", day(20));
        assert_eq!(report.removed_count(), 2);
        let remaining = store.list("Test1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, day(3));
    }

    #[test]
    fn test_apply_combines_rules() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "Test1", &[1, 2, 10, 11, 12]);

        let policy = RetentionPolicy::new(4).max_age_days(5);
        let report = policy.apply_at(&store, "Test1", day(14));

        let remaining: Vec<_> = store
            .list("Test1")
            .unwrap()
            .into_iter()
            .map(|info| info.timestamp)
            .collect();
        assert_eq!(remaining, vec![day(10), day(11), day(12)]);
        assert_eq!(report.removed_count(), 2);
    }

    #[test]
    fn test_apply_all_sweeps_every_entity() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "jobA", &[1, 2, 3]);
        seeded(&store, "folder/jobB", &[1, 2, 3]);

        let report = RetentionPolicy::new(1).apply_all(&store);
        assert_eq!(report.removed_count(), 4);
        assert_eq!(store.list("jobA").unwrap().len(), 1);
        assert_eq!(store.list("folder/jobB").unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_policy_sweeps_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "jobA", &[1, 2, 3]);

        let report = RetentionPolicy::disabled().apply_all(&store);
        assert_eq!(report.removed_count(), 0);
        assert_eq!(store.list("jobA").unwrap().len(), 3);
    }

    #[test]
    fn test_apply_all_clears_interrupted_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = RevisionStore::open(temp_dir.path()).unwrap();
        seeded(&store, "jobA", &[1, 2]);
        let leftover = store.root_dir_for("jobA").unwrap().join(".trash-2012-11-01_12-00-00-x");
        std::fs::create_dir(&leftover).unwrap();

        let report = RetentionPolicy::new(5).apply_all(&store);
        assert_eq!(report.leftovers_removed, 1);
        assert_eq!(report.removed_count(), 0);
        assert!(!leftover.exists());
        assert_eq!(store.list("jobA").unwrap().len(), 2);
    }
}
