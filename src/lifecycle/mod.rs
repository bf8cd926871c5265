//! Entry points for the host's configuration and build lifecycle.
//!
//! The host constructs one [`HistoryRecorder`] at start-up, shares it by
//! `Arc`, and calls it from its own event hooks through the
//! [`HistoryListener`] trait. The recorder never calls back into the host.

use crate::config::HistoryConfig;
use crate::core::{Actor, HistoryError, Operation, Result, RevisionInfo};
use crate::query::{ChangeBadge, ChangeSinceBuildQuery, DiffLink};
use crate::retention::RetentionPolicy;
use crate::storage::RevisionStore;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// A configuration change reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Created {
        entity: String,
        actor: Actor,
        config: Vec<u8>,
    },
    Changed {
        entity: String,
        actor: Actor,
        config: Vec<u8>,
    },
    Renamed {
        old_name: String,
        new_name: String,
        actor: Actor,
        config: Vec<u8>,
    },
    Deleted {
        entity: String,
        actor: Actor,
        config: Vec<u8>,
    },
}

impl ConfigEvent {
    /// Name of the entity after the event.
    pub fn entity(&self) -> &str {
        match self {
            ConfigEvent::Created { entity, .. }
            | ConfigEvent::Changed { entity, .. }
            | ConfigEvent::Deleted { entity, .. } => entity,
            ConfigEvent::Renamed { new_name, .. } => new_name,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            ConfigEvent::Created { .. } => Operation::Created,
            ConfigEvent::Changed { .. } => Operation::Changed,
            ConfigEvent::Renamed { .. } => Operation::Renamed,
            ConfigEvent::Deleted { .. } => Operation::Deleted,
        }
    }
}

/// Callback interface the host registers with its event source.
pub trait HistoryListener: Send + Sync {
    /// Records a configuration event. Returns `None` for untracked entities.
    fn on_config_event(&self, event: &ConfigEvent) -> Result<Option<RevisionInfo>>;

    /// Checks whether the entity's configuration changed after `reference`,
    /// usually the start of the previous build.
    fn on_build_started(&self, entity: &str, reference: DateTime<Utc>) -> Result<Option<ChangeBadge>>;
}

pub struct HistoryRecorder {
    store: Arc<RevisionStore>,
    retention: RetentionPolicy,
    exclude: Option<Regex>,
    root_url: String,
    prune_on_write: bool,
}

impl HistoryRecorder {
    pub fn new(store: Arc<RevisionStore>, config: &HistoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            retention: RetentionPolicy::from_config(config),
            exclude: config.compiled_exclude_pattern()?,
            root_url: config.normalized_root_url(),
            prune_on_write: config.prune_on_write,
        })
    }

    /// Opens the store at `config.history_root` and wraps it.
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RevisionStore::open(&config.history_root)?);
        Self::new(store, config)
    }

    pub fn store(&self) -> &Arc<RevisionStore> {
        &self.store
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// False for entities matching the exclude pattern.
    pub fn is_tracked(&self, entity: &str) -> bool {
        self.exclude
            .as_ref()
            .is_none_or(|pattern| !pattern.is_match(entity))
    }

    pub fn on_created(&self, entity: &str, actor: &Actor, config: &[u8]) -> Result<Option<RevisionInfo>> {
        self.record(entity, Operation::Created, actor, config, None)
    }

    pub fn on_changed(&self, entity: &str, actor: &Actor, config: &[u8]) -> Result<Option<RevisionInfo>> {
        self.record(entity, Operation::Changed, actor, config, None)
    }

    pub fn on_deleted(&self, entity: &str, actor: &Actor, config: &[u8]) -> Result<Option<RevisionInfo>> {
        self.record(entity, Operation::Deleted, actor, config, None)
    }

    /// Moves the existing history to the new name, then records the rename
    /// under it.
    ///
    /// The history follows the entity even when the new name is excluded;
    /// only the rename record is skipped in that case.
    pub fn on_renamed(
        &self,
        old_name: &str,
        new_name: &str,
        actor: &Actor,
        config: &[u8],
    ) -> Result<Option<RevisionInfo>> {
        match self.store.relocate(old_name, new_name) {
            Ok(()) => {}
            Err(HistoryError::NotFound(_)) => {
                event!(Level::DEBUG, from = %old_name, "no history to relocate");
            }
            Err(err) => return Err(err),
        }

        self.record(new_name, Operation::Renamed, actor, config, Some(old_name))
    }

    fn record(
        &self,
        entity: &str,
        operation: Operation,
        actor: &Actor,
        config: &[u8],
        old_name: Option<&str>,
    ) -> Result<Option<RevisionInfo>> {
        if !self.is_tracked(entity) {
            return Ok(None);
        }

        let info = self.store.append(entity, operation, actor, config, old_name)?;
        if self.prune_on_write && self.retention.is_enabled() {
            self.retention.apply(&self.store, entity);
        }
        Ok(Some(info))
    }
}

impl HistoryListener for HistoryRecorder {
    fn on_config_event(&self, event: &ConfigEvent) -> Result<Option<RevisionInfo>> {
        match event {
            ConfigEvent::Created { entity, actor, config } => self.on_created(entity, actor, config),
            ConfigEvent::Changed { entity, actor, config } => self.on_changed(entity, actor, config),
            ConfigEvent::Renamed {
                old_name,
                new_name,
                actor,
                config,
            } => self.on_renamed(old_name, new_name, actor, config),
            ConfigEvent::Deleted { entity, actor, config } => self.on_deleted(entity, actor, config),
        }
    }

    fn on_build_started(&self, entity: &str, reference: DateTime<Utc>) -> Result<Option<ChangeBadge>> {
        if !self.is_tracked(entity) {
            return Ok(None);
        }

        let span = info_span!("history.build_started", entity = %entity, reference = %reference);
        let _enter = span.enter();

        let Some(change) = ChangeSinceBuildQuery::has_changed_since(&self.store, entity, reference)? else {
            return Ok(None);
        };

        let address = change.diff_address();
        let link = DiffLink::build(&self.root_url, &self.store, entity, &address)?;
        event!(Level::DEBUG, address = %address, "configuration changed since last build");
        Ok(Some(ChangeBadge {
            entity: entity.to_string(),
            address,
            link,
        }))
    }
}
