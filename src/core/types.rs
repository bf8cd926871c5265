use crate::storage::identifier::RevisionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display name recorded when a change has no authenticated user.
pub const ANONYMOUS_NAME: &str = "Anonym";

/// Stable id recorded when a change has no authenticated user.
pub const ANONYMOUS_ID: &str = "anonymous";

/// The action on an entity that produced a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Changed,
    Renamed,
    Deleted,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Created => "created",
            Operation::Changed => "changed",
            Operation::Renamed => "renamed",
            Operation::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user who performed an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    display_name: String,
    id: String,
}

impl Actor {
    /// Creates an actor for an authenticated user
    pub fn new(display_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            id: id.into(),
        }
    }

    /// The marker used for unauthenticated changes
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_NAME, ANONYMOUS_ID)
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_ID
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Metadata of one stored revision, without the configuration bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub entity: String,
    pub identifier: RevisionId,
    pub operation: Operation,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    /// Only set for [`Operation::Renamed`].
    pub old_name: Option<String>,
}

/// A revision together with the exact configuration bytes it captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub info: RevisionInfo,
    pub snapshot: Vec<u8>,
}

impl Revision {
    pub fn identifier(&self) -> &RevisionId {
        &self.info.identifier
    }

    /// Snapshot as text, replacing invalid UTF-8 sequences.
    pub fn snapshot_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_serializes_lowercase() {
        let json = serde_json::to_string(&Operation::Renamed).unwrap();
        assert_eq!(json, "\"renamed\"");
        let parsed: Operation = serde_json::from_str("\"deleted\"").unwrap();
        assert_eq!(parsed, Operation::Deleted);
    }

    #[test]
    fn test_anonymous_actor() {
        let actor = Actor::default();
        assert!(actor.is_anonymous());
        assert_eq!(actor.display_name(), "Anonym");

        let named = Actor::new("Full Name", "userId");
        assert!(!named.is_anonymous());
        assert_eq!(named.id(), "userId");
    }
}
