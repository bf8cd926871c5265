//! File-system revision store.
//!
//! Every entity owns one directory under `<history_root>/jobs`. Each revision
//! is a directory named by its [`RevisionId`] holding the metadata record and
//! the configuration snapshot. Revisions are assembled in a hidden staging
//! directory and renamed into place, so readers only ever see complete ones.

use crate::core::{Actor, HistoryError, Operation, Result, Revision, RevisionInfo};
use crate::storage::identifier::{RevisionId, RevisionIdentifier};
use crate::storage::layout::{
    HISTORY_FILE, HistoryRecord, JOBS_DIR, RELOCATING_PREFIX, SNAPSHOT_FILE, STAGING_PREFIX,
    TRASH_PREFIX, decode_entity_name, encode_entity_name, is_hidden,
};
use crate::storage::locks::EntityLocks;
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, event, info_span};
use uuid::Uuid;

// ============================================================================
// Revision Store
// ============================================================================

pub struct RevisionStore {
    history_root: PathBuf,
    locks: EntityLocks,
}

impl RevisionStore {
    /// Creates a store rooted at `history_root` without touching the disk.
    pub fn new<P: AsRef<Path>>(history_root: P) -> Self {
        Self {
            history_root: history_root.as_ref().to_path_buf(),
            locks: EntityLocks::new(),
        }
    }

    /// Creates a store and makes sure its jobs directory exists.
    pub fn open<P: AsRef<Path>>(history_root: P) -> Result<Self> {
        let store = Self::new(history_root);
        let jobs_dir = store.jobs_dir();
        fs::create_dir_all(&jobs_dir).map_err(|e| {
            HistoryError::WriteError(format!(
                "Failed to create history directory '{}': {}",
                jobs_dir.display(),
                e
            ))
        })?;
        Ok(store)
    }

    pub fn history_root(&self) -> &Path {
        &self.history_root
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.history_root.join(JOBS_DIR)
    }

    /// Directory holding every revision of `entity`.
    pub fn root_dir_for(&self, entity: &str) -> Result<PathBuf> {
        Ok(self.jobs_dir().join(encode_entity_name(entity)?))
    }

    /// Directory of a single revision.
    pub fn revision_dir(&self, entity: &str, identifier: &RevisionId) -> Result<PathBuf> {
        Ok(self.root_dir_for(entity)?.join(identifier.as_str()))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Records a new revision stamped with the current time.
    pub fn append(
        &self,
        entity: &str,
        operation: Operation,
        actor: &Actor,
        config: &[u8],
        old_name: Option<&str>,
    ) -> Result<RevisionInfo> {
        self.append_at(entity, operation, actor, config, old_name, Utc::now())
    }

    /// Records a new revision for a change that happened at `now`.
    ///
    /// The new identifier always sorts after every revision already in the
    /// log. If `now` is not later than the newest one, or the clock stepped
    /// backwards, the revision is stamped one second past the newest instead.
    pub fn append_at(
        &self,
        entity: &str,
        operation: Operation,
        actor: &Actor,
        config: &[u8],
        old_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RevisionInfo> {
        let entity_dir = self.root_dir_for(entity)?;
        let span = info_span!(
            "history.append",
            entity = %entity,
            operation = %operation,
            user = %actor.id()
        );
        let _enter = span.enter();

        let lock = self.locks.lock_for(entity)?;
        let _guard = lock.lock()?;

        if operation != Operation::Created {
            if let Some(head) = self.latest(entity)? {
                if head.operation == Operation::Deleted {
                    event!(Level::WARN, head = %head.identifier, "append rejected, entity is deleted");
                    return Err(HistoryError::EntityDeleted(entity.to_string()));
                }
            }
        }

        fs::create_dir_all(&entity_dir).map_err(|e| {
            HistoryError::WriteError(format!(
                "Failed to create history directory '{}': {}",
                entity_dir.display(),
                e
            ))
        })?;

        let existing = identifiers_in(&entity_dir)?;
        let identifier = RevisionIdentifier::generate(now, &existing)?;
        let timestamp = identifier.timestamp()?;
        let record = HistoryRecord::new(operation, actor, timestamp, old_name.map(str::to_string));

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&entity_dir)
            .map_err(|e| {
                HistoryError::WriteError(format!(
                    "Failed to create staging directory in '{}': {}",
                    entity_dir.display(),
                    e
                ))
            })?;

        write_synced(&staging.path().join(SNAPSHOT_FILE), config)?;
        let metadata = serde_json::to_vec_pretty(&record).map_err(|e| {
            HistoryError::WriteError(format!("Failed to serialize history record: {}", e))
        })?;
        write_synced(&staging.path().join(HISTORY_FILE), &metadata)?;

        let revision_dir = entity_dir.join(identifier.as_str());
        fs::rename(staging.path(), &revision_dir).map_err(|e| {
            HistoryError::WriteError(format!(
                "Failed to publish revision '{}': {}",
                revision_dir.display(),
                e
            ))
        })?;

        event!(Level::DEBUG, identifier = %identifier, bytes = config.len(), "revision appended");
        Ok(record.into_info(entity, identifier))
    }

    /// Moves the whole log of `old_entity` to `new_entity`.
    ///
    /// The log is first renamed to a hidden staging name and then to its new
    /// name. If the second step fails the first one is undone, so the log
    /// ends up under exactly one of the two names.
    pub fn relocate(&self, old_entity: &str, new_entity: &str) -> Result<()> {
        let old_dir = self.root_dir_for(old_entity)?;
        let new_dir = self.root_dir_for(new_entity)?;
        if old_dir == new_dir {
            return Ok(());
        }

        let span = info_span!("history.relocate", from = %old_entity, to = %new_entity);
        let _enter = span.enter();

        let (first, second) = self.locks.pair_for(old_entity, new_entity)?;
        let _first_guard = first.lock()?;
        let _second_guard = match second.as_ref() {
            Some(lock) => Some(lock.lock()?),
            None => None,
        };

        if !old_dir.is_dir() {
            return Err(HistoryError::NotFound(format!(
                "No history for entity '{}'",
                old_entity
            )));
        }
        if new_dir.exists() {
            return Err(HistoryError::WriteError(format!(
                "History for entity '{}' already exists at '{}'",
                new_entity,
                new_dir.display()
            )));
        }

        let staging = self
            .jobs_dir()
            .join(format!("{}{}", RELOCATING_PREFIX, Uuid::new_v4().simple()));
        rename_via(&old_dir, &staging, &new_dir)?;

        event!(Level::INFO, "history relocated");
        Ok(())
    }

    /// Deletes leftovers of interrupted writes: staging and trash directories
    /// inside entity logs. Each log is cleaned under its entity lock, so
    /// appends in flight are not disturbed.
    ///
    /// Logs stranded under a relocation name are never deleted. They are
    /// reported with a warning and returned so they can be moved back by hand.
    pub fn sweep_leftovers(&self) -> Result<SweepReport> {
        let span = info_span!("history.sweep");
        let _enter = span.enter();

        let mut report = SweepReport::default();
        let jobs_dir = self.jobs_dir();
        let entries = match fs::read_dir(&jobs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                return Err(HistoryError::IoError(format!(
                    "Failed to list '{}': {}",
                    jobs_dir.display(),
                    e
                )));
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(RELOCATING_PREFIX) {
                warn!("stranded history log at {}", entry.path().display());
                report.stranded.push(entry.path());
                continue;
            }
            if is_hidden(&name) {
                continue;
            }
            let Some(entity) = decode_entity_name(&name) else {
                continue;
            };

            let lock = self.locks.lock_for(&entity)?;
            let _guard = lock.lock()?;
            for leftover in leftovers_in(&entry.path()) {
                match fs::remove_dir_all(&leftover) {
                    Ok(()) => report.removed.push(leftover),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!("could not delete leftover {}: {}", leftover.display(), e),
                }
            }
        }

        let released = self.locks.release_idle()?;
        event!(
            Level::INFO,
            removed = report.removed.len(),
            stranded = report.stranded.len(),
            released,
            "leftover sweep finished"
        );
        Ok(report)
    }

    /// Deletes one revision with both of its artifacts.
    ///
    /// The directory is renamed to a hidden trash name before it is deleted,
    /// so listings never observe a half-deleted revision.
    pub fn remove(&self, entity: &str, identifier: &RevisionId) -> Result<()> {
        let entity_dir = self.root_dir_for(entity)?;
        let revision_dir = entity_dir.join(identifier.as_str());
        if !revision_dir.is_dir() {
            return Err(HistoryError::NotFound(format!(
                "Revision '{}' of entity '{}'",
                identifier, entity
            )));
        }

        let trash = entity_dir.join(format!(
            "{}{}-{}",
            TRASH_PREFIX,
            identifier,
            Uuid::new_v4().simple()
        ));
        fs::rename(&revision_dir, &trash).map_err(|e| {
            HistoryError::WriteError(format!(
                "Failed to retire revision '{}': {}",
                revision_dir.display(),
                e
            ))
        })?;
        fs::remove_dir_all(&trash).map_err(|e| {
            HistoryError::WriteError(format!(
                "Failed to delete revision '{}': {}",
                trash.display(),
                e
            ))
        })?;

        event!(Level::DEBUG, entity = %entity, identifier = %identifier, "revision removed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Lazy view over the revisions of `entity` in ascending identifier order.
    pub fn revisions(&self, entity: &str) -> Result<RevisionListing> {
        let entity_dir = self.root_dir_for(entity)?;
        let identifiers = identifiers_in(&entity_dir)?.into_iter().collect();
        Ok(RevisionListing {
            entity: entity.to_string(),
            entity_dir,
            identifiers,
        })
    }

    /// All readable revisions of `entity`, oldest first.
    pub fn list(&self, entity: &str) -> Result<Vec<RevisionInfo>> {
        Ok(self.revisions(entity)?.iter().collect())
    }

    /// The newest readable revision, if any.
    pub fn latest(&self, entity: &str) -> Result<Option<RevisionInfo>> {
        let listing = self.revisions(entity)?;
        Ok(listing
            .identifiers
            .iter()
            .rev()
            .find_map(|identifier| listing.load(identifier)))
    }

    /// Metadata of one revision.
    pub fn read_info(&self, entity: &str, identifier: &RevisionId) -> Result<RevisionInfo> {
        let revision_dir = self.existing_revision_dir(entity, identifier)?;
        let record = load_record(&revision_dir)?;
        Ok(record.into_info(entity, identifier.clone()))
    }

    /// One revision with its snapshot bytes.
    pub fn read(&self, entity: &str, identifier: &RevisionId) -> Result<Revision> {
        let revision_dir = self.existing_revision_dir(entity, identifier)?;
        let record = load_record(&revision_dir)?;
        let snapshot_path = revision_dir.join(SNAPSHOT_FILE);
        let snapshot = fs::read(&snapshot_path).map_err(|e| {
            HistoryError::Corruption(format!(
                "Failed to read snapshot '{}': {}",
                snapshot_path.display(),
                e
            ))
        })?;
        Ok(Revision {
            info: record.into_info(entity, identifier.clone()),
            snapshot,
        })
    }

    /// Names of every entity that has a history directory, sorted.
    pub fn entities(&self) -> Result<Vec<String>> {
        let jobs_dir = self.jobs_dir();
        let entries = match fs::read_dir(&jobs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HistoryError::IoError(format!(
                    "Failed to list '{}': {}",
                    jobs_dir.display(),
                    e
                )));
            }
        };

        let mut entities = Vec::new();
        for entry in entries.flatten() {
            let Some(segment) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_hidden(&segment) || !entry.path().is_dir() {
                continue;
            }
            match decode_entity_name(&segment) {
                Some(name) => entities.push(name),
                None => warn!("ignoring foreign directory in history root: '{}'", segment),
            }
        }
        entities.sort();
        Ok(entities)
    }

    fn existing_revision_dir(&self, entity: &str, identifier: &RevisionId) -> Result<PathBuf> {
        let revision_dir = self.revision_dir(entity, identifier)?;
        if revision_dir.is_dir() {
            Ok(revision_dir)
        } else {
            Err(HistoryError::NotFound(format!(
                "Revision '{}' of entity '{}'",
                identifier, entity
            )))
        }
    }
}

// ============================================================================
// Listing
// ============================================================================

/// Sorted identifiers of one entity, read lazily.
///
/// Each call to [`RevisionListing::iter`] starts over and re-reads the
/// metadata, so a listing can be walked any number of times. Entries whose
/// metadata or snapshot is missing or malformed are skipped.
#[derive(Debug, Clone)]
pub struct RevisionListing {
    entity: String,
    entity_dir: PathBuf,
    identifiers: Vec<RevisionId>,
}

impl RevisionListing {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Identifiers of every candidate entry, valid or not.
    pub fn identifiers(&self) -> &[RevisionId] {
        &self.identifiers
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn iter(&self) -> RevisionIter<'_> {
        RevisionIter {
            listing: self,
            next: 0,
        }
    }

    fn load(&self, identifier: &RevisionId) -> Option<RevisionInfo> {
        match load_info(&self.entity_dir, &self.entity, identifier) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(
                    "skipping history entry: entity='{}' revision='{}' error='{}'",
                    self.entity, identifier, err
                );
                None
            }
        }
    }
}

impl<'a> IntoIterator for &'a RevisionListing {
    type Item = RevisionInfo;
    type IntoIter = RevisionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct RevisionIter<'a> {
    listing: &'a RevisionListing,
    next: usize,
}

impl Iterator for RevisionIter<'_> {
    type Item = RevisionInfo;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(identifier) = self.listing.identifiers.get(self.next) {
            self.next += 1;
            if let Some(info) = self.listing.load(identifier) {
                return Some(info);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.listing.identifiers.len() - self.next))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// What [`RevisionStore::sweep_leftovers`] found.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Staging and trash directories that were deleted.
    pub removed: Vec<PathBuf>,
    /// Whole logs left behind by a failed relocation.
    pub stranded: Vec<PathBuf>,
}

/// Renames `from` to `to` through the hidden `staging` name. When the second
/// step fails the first is undone, so the data ends up under `from` or `to`.
fn rename_via(from: &Path, staging: &Path, to: &Path) -> Result<()> {
    fs::rename(from, staging).map_err(|e| {
        HistoryError::WriteError(format!(
            "Failed to move '{}' to staging: {}",
            from.display(),
            e
        ))
    })?;

    if let Err(err) = fs::rename(staging, to) {
        if let Err(rollback) = fs::rename(staging, from) {
            event!(
                Level::ERROR,
                staging = %staging.display(),
                error = %rollback,
                "relocation rollback failed"
            );
        }
        return Err(HistoryError::WriteError(format!(
            "Failed to move history to '{}': {}",
            to.display(),
            err
        )));
    }
    Ok(())
}

/// Staging and trash entries directly inside one entity log.
fn leftovers_in(entity_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(entity_dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX)
        })
        .map(|entry| entry.path())
        .collect()
}

/// Every well-formed identifier present in `entity_dir`, including entries
/// that are not readable. A missing directory is an empty history.
fn identifiers_in(entity_dir: &Path) -> Result<BTreeSet<RevisionId>> {
    let entries = match fs::read_dir(entity_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => {
            return Err(HistoryError::IoError(format!(
                "Failed to list '{}': {}",
                entity_dir.display(),
                e
            )));
        }
    };

    let mut identifiers = BTreeSet::new();
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(identifier) = RevisionId::parse(name) {
                identifiers.insert(identifier);
            }
        }
    }
    Ok(identifiers)
}

fn load_record(revision_dir: &Path) -> Result<HistoryRecord> {
    let path = revision_dir.join(HISTORY_FILE);
    let bytes = fs::read(&path).map_err(|e| {
        HistoryError::Corruption(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        HistoryError::Corruption(format!("Failed to parse '{}': {}", path.display(), e))
    })
}

fn load_info(entity_dir: &Path, entity: &str, identifier: &RevisionId) -> Result<RevisionInfo> {
    let revision_dir = entity_dir.join(identifier.as_str());
    let record = load_record(&revision_dir)?;
    let snapshot_path = revision_dir.join(SNAPSHOT_FILE);
    if !snapshot_path.is_file() {
        return Err(HistoryError::Corruption(format!(
            "Missing snapshot '{}'",
            snapshot_path.display()
        )));
    }
    Ok(record.into_info(entity, identifier.clone()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |e: std::io::Error| {
        HistoryError::WriteError(format!("Failed to write '{}': {}", path.display(), e))
    };
    let file = File::create(path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes).map_err(write_err)?;
    writer.flush().map_err(write_err)?;
    writer.get_ref().sync_all().map_err(write_err)?;
    Ok(())
}
