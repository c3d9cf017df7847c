//! Per-node action classification.
//!
//! Compares a node's live fingerprint with its stored revision record and
//! decides what the build pass has to do about it. Pure; never touches disk.

use serde::Serialize;

use crate::error::BuildError;
use crate::state::{RevStatus, RevisionRecord};

/// The modification a node needs in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Never built; realize it.
    Create,
    /// Built before but changed, failed or invalidated; update it.
    Touch,
    /// No longer desired; destroy it.
    Delete,
    /// Forced full rebuild.
    Rebuild,
    /// Up to date.
    #[serde(rename = "NONE")]
    Noop,
}

/// The desired side of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveState {
    /// Fingerprint of the node's current definition.
    pub fingerprint: u64,
    /// Whether a rebuild was requested for the node.
    pub rebuild: bool,
}

/// An action together with why it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The chosen action.
    pub action: Action,
    /// Short explanation.
    pub reason: &'static str,
}

impl Action {
    /// Returns true if the action changes anything.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::Noop)
    }
}

/// Decides the action for one node.
///
/// `live` is `None` when the node was pruned from the desired tree; `stored`
/// is `None` when no record exists (or it could not be read).
///
/// # Errors
///
/// Returns [`BuildError::ClassificationAmbiguous`] when neither side exists.
pub fn classify(
    id: &str,
    live: Option<LiveState>,
    stored: Option<&RevisionRecord>,
) -> Result<Classification, BuildError> {
    let (action, reason) = match (live, stored) {
        (None, None) => {
            return Err(BuildError::ClassificationAmbiguous {
                id: id.to_string(),
                reason: String::from("node is neither desired nor recorded"),
            });
        }
        (Some(_), None) => (Action::Create, "not built yet"),
        (None, Some(_)) => (Action::Delete, "removed from topology"),
        (Some(live), Some(_)) if live.rebuild => (Action::Rebuild, "rebuild requested"),
        (Some(live), Some(record)) => match record.status {
            // Taint is decided by status; the sentinel never matches a live fingerprint.
            RevStatus::Stale => (Action::Touch, "tainted"),
            RevStatus::Failed => (Action::Touch, "retrying failed apply"),
            RevStatus::Unknown | RevStatus::Planned => (Action::Touch, "state unknown"),
            RevStatus::Active if record.is_tainted() => (Action::Touch, "tainted"),
            RevStatus::Active if record.checksum == live.fingerprint => (Action::Noop, "up to date"),
            RevStatus::Active => (Action::Touch, "definition changed"),
        },
    };

    Ok(Classification { action, reason })
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Touch => "touch",
            Self::Delete => "delete",
            Self::Rebuild => "rebuild",
            Self::Noop => "none",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{NodeKind, TAINT_CHECKSUM};

    const STATUSES: [RevStatus; 5] = [
        RevStatus::Unknown,
        RevStatus::Stale,
        RevStatus::Active,
        RevStatus::Planned,
        RevStatus::Failed,
    ];

    fn record(status: RevStatus, checksum: u64) -> RevisionRecord {
        let mut record = RevisionRecord::new("teams/0/networks/corp", NodeKind::Network);
        record.status = status;
        record.checksum = checksum;
        record
    }

    fn live(fingerprint: u64, rebuild: bool) -> Option<LiveState> {
        Some(LiveState {
            fingerprint,
            rebuild,
        })
    }

    #[test]
    fn test_classifier_is_total() {
        for status in STATUSES {
            for matches in [true, false] {
                for rebuild in [true, false] {
                    let stored = record(status, 10);
                    let fp = if matches { 10 } else { 11 };

                    let present = classify("n", live(fp, rebuild), Some(&stored))
                        .expect("present record classifies")
                        .action;
                    let expected = if rebuild {
                        Action::Rebuild
                    } else if status == RevStatus::Active && matches {
                        Action::Noop
                    } else {
                        Action::Touch
                    };
                    assert_eq!(present, expected, "{status} match={matches} rebuild={rebuild}");

                    let pruned = classify("n", None, Some(&stored)).expect("pruned classifies");
                    assert_eq!(pruned.action, Action::Delete);
                }
            }
        }

        for rebuild in [true, false] {
            let absent = classify("n", live(10, rebuild), None).expect("absent classifies");
            assert_eq!(absent.action, Action::Create);
        }

        assert!(matches!(
            classify("n", None, None),
            Err(BuildError::ClassificationAmbiguous { .. })
        ));
    }

    #[test]
    fn test_taint_never_yields_noop() {
        let mut stored = record(RevStatus::Active, 10);
        stored.taint();

        let result = classify("n", live(10, false), Some(&stored)).expect("classifies");
        assert_eq!(result.action, Action::Touch);

        // Even a live fingerprint equal to the sentinel does not match.
        let result = classify("n", live(TAINT_CHECKSUM, false), Some(&stored)).expect("classifies");
        assert_eq!(result.action, Action::Touch);

        let result = classify("n", live(10, true), Some(&stored)).expect("classifies");
        assert_eq!(result.action, Action::Rebuild);
    }

    #[test]
    fn test_active_record_with_sentinel_checksum_is_tainted() {
        let stored = record(RevStatus::Active, TAINT_CHECKSUM);
        let result =
            classify("n", live(TAINT_CHECKSUM, false), Some(&stored)).expect("classifies");
        assert_eq!(result.action, Action::Touch);
    }

    #[test]
    fn test_failed_record_retries_with_touch() {
        let stored = record(RevStatus::Failed, 10);
        let result = classify("n", live(10, false), Some(&stored)).expect("classifies");
        assert_eq!(result.action, Action::Touch);
        assert_eq!(result.reason, "retrying failed apply");
    }

    #[test]
    fn test_action_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Action::Noop).expect("serialize"),
            "\"NONE\""
        );
        assert_eq!(
            serde_json::to_string(&Action::Rebuild).expect("serialize"),
            "\"REBUILD\""
        );
    }
}
