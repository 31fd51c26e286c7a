//! Document change events
//!
//! Every committed write to the document store produces one event per
//! touched path. Reactors subscribe to these to implement write triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::schema::TriggerPath;

/// What happened to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A committed change to one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    /// Full document path
    pub path: String,

    /// Kind of change
    pub change: ChangeKind,

    /// Store version assigned by the committing write
    pub version: u64,

    /// Commit time
    pub timestamp: DateTime<Utc>,
}

impl DocumentEvent {
    pub fn new(path: impl Into<String>, change: ChangeKind, version: u64) -> Self {
        Self {
            path: path.into(),
            change,
            version,
            timestamp: Utc::now(),
        }
    }

    /// Whether the document now exists (created or updated)
    pub fn is_write(&self) -> bool {
        matches!(self.change, ChangeKind::Created | ChangeKind::Updated)
    }

    /// Match the path against the reactor trigger patterns
    pub fn trigger(&self) -> Option<TriggerPath> {
        TriggerPath::parse(&self.path)
    }

    /// Whether the path lies under the given prefix (segment-aligned)
    pub fn is_under(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        self.path == prefix
            || (self.path.starts_with(prefix) && self.path[prefix.len()..].starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_under_is_segment_aligned() {
        let event = DocumentEvent::new("experiments/e1/participants/p1", ChangeKind::Created, 1);
        assert!(event.is_under("experiments/e1"));
        assert!(event.is_under("experiments/e1/"));
        assert!(event.is_under("experiments/e1/participants/p1"));
        assert!(!event.is_under("experiments/e"));
        assert!(!event.is_under("experiments/e1/participants/p10"));
    }

    #[test]
    fn test_trigger_and_write_flags() {
        let event = DocumentEvent::new("experiments/e1/participants/p1", ChangeKind::Deleted, 4);
        assert!(!event.is_write());
        assert!(matches!(
            event.trigger(),
            Some(TriggerPath::Participant { .. })
        ));
        assert_eq!(event.change.to_string(), "deleted");
    }
}
