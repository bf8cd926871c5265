//! On-disk layout of the history store.
//!
//! ```text
//! <history_root>/jobs/<encoded entity>/<revision id>/history.json
//!                                                   /config.xml
//! ```
//!
//! Entries whose name starts with `.` are staging or trash directories and
//! are never part of the visible history.

use crate::core::{Actor, HistoryError, Operation, Result, RevisionInfo};
use crate::storage::identifier::RevisionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directory under the history root that holds one directory per entity.
pub const JOBS_DIR: &str = "jobs";

/// Metadata record of a revision.
pub const HISTORY_FILE: &str = "history.json";

/// Raw configuration snapshot of a revision.
pub const SNAPSHOT_FILE: &str = "config.xml";

pub const HISTORY_FORMAT_VERSION: u32 = 1;

pub(crate) const STAGING_PREFIX: &str = ".staging-";
pub(crate) const TRASH_PREFIX: &str = ".trash-";
pub(crate) const RELOCATING_PREFIX: &str = ".relocating-";

/// Returns true for staging and trash entries.
#[inline]
pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Encodes an entity name into a single safe path segment.
///
/// ASCII letters, digits, `_` and `-` are kept; every other byte of the
/// UTF-8 form becomes `%XX`. Dots are always encoded, so `.`, `..` and
/// hidden names cannot be produced.
pub fn encode_entity_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(HistoryError::InvalidEntityName(
            "entity name must not be empty".to_string(),
        ));
    }

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    Ok(encoded)
}

/// Reverses [`encode_entity_name`]. Returns `None` for segments this store
/// did not produce.
pub fn decode_entity_name(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = segment.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => {
                decoded.push(bytes[i]);
                i += 1;
            }
            _ => return None,
        }
    }

    if decoded.is_empty() {
        return None;
    }
    String::from_utf8(decoded).ok()
}

/// Serialized form of `history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HistoryRecord {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub operation: Operation,
    pub user: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
}

fn default_format_version() -> u32 {
    HISTORY_FORMAT_VERSION
}

impl HistoryRecord {
    pub fn new(
        operation: Operation,
        actor: &Actor,
        timestamp: DateTime<Utc>,
        old_name: Option<String>,
    ) -> Self {
        Self {
            format_version: HISTORY_FORMAT_VERSION,
            operation,
            user: actor.display_name().to_string(),
            user_id: actor.id().to_string(),
            timestamp,
            old_name,
        }
    }

    pub fn into_info(self, entity: &str, identifier: RevisionId) -> RevisionInfo {
        RevisionInfo {
            entity: entity.to_string(),
            identifier,
            operation: self.operation,
            actor: Actor::new(self.user, self.user_id),
            timestamp: self.timestamp,
            old_name: self.old_name,
        }
    }
}
