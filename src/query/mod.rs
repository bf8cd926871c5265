pub mod diff;

pub use diff::{BADGE_ICON, BADGE_TOOLTIP, ChangeBadge, DiffAddress, DiffLink};

use crate::core::{Result, RevisionInfo};
use crate::storage::RevisionStore;
use chrono::{DateTime, Utc};
use log::warn;

/// The newest configuration change of an entity and the revision right
/// before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub latest: RevisionInfo,
    pub previous: RevisionInfo,
}

impl ConfigChange {
    /// Address comparing `previous` with `latest`.
    pub fn diff_address(&self) -> DiffAddress {
        DiffAddress::for_revisions(&self.previous, &self.latest)
    }
}

/// Answers "did the configuration change after this moment?"
pub struct ChangeSinceBuildQuery;

impl ChangeSinceBuildQuery {
    /// Returns the latest change of `entity` if it happened strictly after
    /// `reference`, together with its predecessor.
    pub fn has_changed_since(
        store: &RevisionStore,
        entity: &str,
        reference: DateTime<Utc>,
    ) -> Result<Option<ConfigChange>> {
        let revisions = store.list(entity)?;
        Ok(Self::evaluate(&revisions, reference))
    }

    /// Same decision over an already loaded set of revisions.
    ///
    /// `latest` is the greatest identifier that parses back into a moment;
    /// entries whose identifier does not parse are passed over. `previous` is
    /// the entry sorted immediately before `latest`.
    pub fn evaluate(revisions: &[RevisionInfo], reference: DateTime<Utc>) -> Option<ConfigChange> {
        if revisions.len() < 2 {
            return None;
        }

        let mut sorted: Vec<&RevisionInfo> = revisions.iter().collect();
        sorted.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let (index, changed_at) = sorted.iter().enumerate().rev().find_map(|(index, info)| {
            match info.identifier.timestamp() {
                Ok(at) => Some((index, at)),
                Err(err) => {
                    warn!("ignoring revision '{}' of '{}': {}", info.identifier, info.entity, err);
                    None
                }
            }
        })?;

        if index == 0 || changed_at <= reference {
            return None;
        }

        Some(ConfigChange {
            latest: sorted[index].clone(),
            previous: sorted[index - 1].clone(),
        })
    }
}
