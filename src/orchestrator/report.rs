//! Build pass reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::planner::Action;
use crate::topology::NodeKind;

/// Final state of one node after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    /// The action was applied and recorded.
    Committed,
    /// Nothing to do.
    Unchanged,
    /// The action failed; the record is marked `FAILED`.
    Failed,
    /// Not attempted.
    Skipped,
}

/// What happened to one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    /// Node identity.
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Classified action, if the node got that far.
    pub action: Option<Action>,
    /// Final state.
    pub state: NodeState,
    /// Failure or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-action totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    /// Nodes created.
    pub created: usize,
    /// Nodes updated.
    pub touched: usize,
    /// Nodes destroyed.
    pub deleted: usize,
    /// Nodes rebuilt.
    pub rebuilt: usize,
    /// Nodes left as they were.
    pub unchanged: usize,
    /// Nodes whose action failed.
    pub failed: usize,
    /// Nodes not attempted.
    pub skipped: usize,
}

/// Result of a build pass.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Environment that was built.
    pub environment: String,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Totals.
    pub counts: ActionCounts,
    /// Every node visited, in completion order.
    pub outcomes: Vec<NodeOutcome>,
    /// Whether the pass was interrupted.
    pub cancelled: bool,
}

impl BuildReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            started_at: Utc::now(),
            finished_at: None,
            counts: ActionCounts::default(),
            outcomes: Vec::new(),
            cancelled: false,
        }
    }

    /// Records an applied action.
    pub fn committed(&mut self, id: &str, kind: NodeKind, action: Action) {
        match action {
            Action::Create => self.counts.created += 1,
            Action::Touch => self.counts.touched += 1,
            Action::Delete => self.counts.deleted += 1,
            Action::Rebuild => self.counts.rebuilt += 1,
            Action::Noop => self.counts.unchanged += 1,
        }
        let state = if action == Action::Noop {
            NodeState::Unchanged
        } else {
            NodeState::Committed
        };
        self.push(id, kind, Some(action), state, None);
    }

    /// Records a node that needed nothing.
    pub fn unchanged(&mut self, id: &str, kind: NodeKind) {
        self.committed(id, kind, Action::Noop);
    }

    /// Records a failed node.
    pub fn failed(&mut self, id: &str, kind: NodeKind, action: Option<Action>, reason: impl Into<String>) {
        self.counts.failed += 1;
        self.push(id, kind, action, NodeState::Failed, Some(reason.into()));
    }

    /// Records a node that was not attempted.
    pub fn skipped(&mut self, id: &str, kind: NodeKind, reason: impl Into<String>) {
        self.counts.skipped += 1;
        self.push(id, kind, None, NodeState::Skipped, Some(reason.into()));
    }

    fn push(
        &mut self,
        id: &str,
        kind: NodeKind,
        action: Option<Action>,
        state: NodeState,
        reason: Option<String>,
    ) {
        self.outcomes.push(NodeOutcome {
            id: id.to_string(),
            kind,
            action,
            state,
            reason,
        });
    }

    /// Marks the pass finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Returns the outcome of a node.
    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    /// Returns the action a node was given, if it got one.
    #[must_use]
    pub fn action_of(&self, id: &str) -> Option<Action> {
        self.outcome(id).and_then(|o| o.action)
    }

    /// Returns the failed nodes.
    #[must_use]
    pub fn failures(&self) -> Vec<&NodeOutcome> {
        self.with_state(NodeState::Failed)
    }

    /// Returns the nodes that were not attempted.
    #[must_use]
    pub fn skips(&self) -> Vec<&NodeOutcome> {
        self.with_state(NodeState::Skipped)
    }

    fn with_state(&self, state: NodeState) -> Vec<&NodeOutcome> {
        self.outcomes.iter().filter(|o| o.state == state).collect()
    }

    /// Returns true if every node converged.
    #[must_use]
    pub const fn exit_success(&self) -> bool {
        !self.cancelled && self.counts.failed == 0 && self.counts.skipped == 0
    }

    /// Returns the pass duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.cancelled {
            "cancelled"
        } else if self.exit_success() {
            "successful"
        } else {
            "failed"
        };
        writeln!(f, "Build of {} {status}:", self.environment)?;
        writeln!(f, "  Created: {}", self.counts.created)?;
        writeln!(f, "  Updated: {}", self.counts.touched)?;
        writeln!(f, "  Rebuilt: {}", self.counts.rebuilt)?;
        writeln!(f, "  Deleted: {}", self.counts.deleted)?;
        writeln!(f, "  Unchanged: {}", self.counts.unchanged)?;
        writeln!(f, "  Failed: {}", self.counts.failed)?;
        writeln!(f, "  Skipped: {}", self.counts.skipped)?;

        let failures = self.failures();
        if !failures.is_empty() {
            writeln!(f, "  Failures:")?;
            for failure in failures {
                let reason = failure.reason.as_deref().unwrap_or("unknown");
                writeln!(f, "    - {}: {reason}", failure.id)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_exit_status() {
        let mut report = BuildReport::new("regionals");
        report.committed("teams/0", NodeKind::Team, Action::Create);
        report.unchanged("users/ops", NodeKind::User);
        assert!(report.exit_success());

        report.failed("teams/0/networks/corp", NodeKind::Network, Some(Action::Create), "boom");
        report.skipped("teams/0/networks/corp/hosts/web", NodeKind::Host, "blocked");

        assert_eq!(report.counts.created, 1);
        assert_eq!(report.counts.unchanged, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.skipped, 1);
        assert!(!report.exit_success());
        assert_eq!(report.action_of("users/ops"), Some(Action::Noop));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.skips()[0].id, "teams/0/networks/corp/hosts/web");
    }

    #[test]
    fn test_cancelled_report_is_not_successful() {
        let mut report = BuildReport::new("regionals");
        report.cancelled = true;
        assert!(!report.exit_success());
        assert!(report.to_string().contains("cancelled"));
    }
}
