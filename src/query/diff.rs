//! Addresses for comparing two revisions.

use crate::core::{Result, RevisionInfo};
use crate::storage::{RevisionId, RevisionStore};
use std::fmt;
use std::path::PathBuf;

/// Tooltip shown next to builds that started after a configuration change.
pub const BADGE_TOOLTIP: &str = "Config changed since last build.";

/// Icon of the change badge, relative to the host's root URL.
pub const BADGE_ICON: &str = "/plugin/jobConfigHistory/img/buildbadge.png";

/// An ordered pair of revisions to compare, older first.
///
/// Two addresses are equal when they name the same two identifiers, no
/// matter which revision values they were built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiffAddress {
    older: RevisionId,
    newer: RevisionId,
}

impl DiffAddress {
    /// Builds an address from two identifiers in either order.
    pub fn new(a: RevisionId, b: RevisionId) -> Self {
        if a <= b {
            Self { older: a, newer: b }
        } else {
            Self { older: b, newer: a }
        }
    }

    pub fn for_revisions(a: &RevisionInfo, b: &RevisionInfo) -> Self {
        Self::new(a.identifier.clone(), b.identifier.clone())
    }

    pub fn older(&self) -> &RevisionId {
        &self.older
    }

    pub fn newer(&self) -> &RevisionId {
        &self.newer
    }

    /// Revision directories of both sides for `entity`.
    pub fn locations(&self, store: &RevisionStore, entity: &str) -> Result<(PathBuf, PathBuf)> {
        Ok((
            store.revision_dir(entity, &self.older)?,
            store.revision_dir(entity, &self.newer)?,
        ))
    }
}

impl fmt::Display for DiffAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.older, self.newer)
    }
}

/// Target of the "show differences" page for one entity and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLink(String);

impl DiffLink {
    /// `<root_url>job/<entity>/jobConfigHistory/showDiffFiles?histDir1=<older>&histDir2=<newer>`
    /// where both `histDir` values are the revision directories.
    pub fn build(
        root_url: &str,
        store: &RevisionStore,
        entity: &str,
        address: &DiffAddress,
    ) -> Result<Self> {
        let (older_dir, newer_dir) = address.locations(store, entity)?;
        Ok(Self(format!(
            "{}/job/{}/jobConfigHistory/showDiffFiles?histDir1={}&histDir2={}",
            root_url.trim_end_matches('/'),
            url_component(entity),
            url_component(&older_dir.to_string_lossy()),
            url_component(&newer_dir.to_string_lossy()),
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiffLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker attached to a build that started after a configuration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBadge {
    pub entity: String,
    pub address: DiffAddress,
    pub link: DiffLink,
}

impl ChangeBadge {
    pub fn tooltip(&self) -> &'static str {
        BADGE_TOOLTIP
    }

    pub fn icon(&self) -> &'static str {
        BADGE_ICON
    }
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
fn url_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}
