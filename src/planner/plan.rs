//! Build plan types.
//!
//! A plan is the classification of every node without applying anything:
//! what a build pass would do if it ran now.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::classifier::Action;
use crate::topology::NodeKind;

/// A complete build plan.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Environment the plan is for.
    pub environment: String,
    /// Planned actions: deletes deepest first, then applies parent first.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Node identity.
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Action type.
    pub action: Action,
    /// Reason for this action.
    pub reason: String,
    /// Fingerprint of the desired definition, if the node is desired.
    pub checksum: Option<u64>,
    /// Checksum on record, if a record exists.
    pub stored_checksum: Option<u64>,
}

impl BuildPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            environment: environment.into(),
            actions: Vec::new(),
        }
    }

    /// Returns true if the plan changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| !a.action.is_change())
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of one type.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.actions.iter().filter(|a| a.action == action).count()
    }

    /// Returns the actions that change something.
    #[must_use]
    pub fn changes(&self) -> Vec<&PlannedAction> {
        self.actions.iter().filter(|a| a.action.is_change()).collect()
    }

    /// Finds the planned action for a node.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Returns the number of actions per type.
    #[must_use]
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for action in &self.actions {
            *summary.entry(action.action.to_string()).or_insert(0) += 1;
        }
        summary
    }
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {} '{}'", self.kind, self.id),
            Action::Touch => format!("Update {} '{}'", self.kind, self.id),
            Action::Delete => format!("Delete {} '{}'", self.kind, self.id),
            Action::Rebuild => format!("Rebuild {} '{}'", self.kind, self.id),
            Action::Noop => format!("No change for '{}'", self.id),
        }
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let changes = self.changes();
        if changes.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Build Plan ({} changes):", changes.len())?;
        for (i, action) in changes.iter().enumerate() {
            writeln!(f, "  {}. {action}", i + 1)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(id: &str, action: Action) -> PlannedAction {
        PlannedAction {
            id: id.to_string(),
            kind: NodeKind::Host,
            action,
            reason: String::from("test"),
            checksum: Some(1),
            stored_checksum: None,
        }
    }

    #[test]
    fn test_plan_counts() {
        let mut plan = BuildPlan::new("regionals");
        plan.actions.push(planned("a", Action::Create));
        plan.actions.push(planned("b", Action::Noop));
        plan.actions.push(planned("c", Action::Create));

        assert!(!plan.is_noop());
        assert_eq!(plan.count(Action::Create), 2);
        assert_eq!(plan.changes().len(), 2);
        assert_eq!(plan.summary().get("create"), Some(&2));
        assert_eq!(plan.get("b").map(|a| a.action), Some(Action::Noop));
    }

    #[test]
    fn test_noop_plan_display() {
        let mut plan = BuildPlan::new("regionals");
        plan.actions.push(planned("a", Action::Noop));
        assert!(plan.is_noop());
        assert_eq!(plan.to_string(), "No changes required");
    }

    #[test]
    fn test_description() {
        assert_eq!(
            planned("teams/0/networks/corp/hosts/web", Action::Touch).description(),
            "Update host 'teams/0/networks/corp/hosts/web'"
        );
    }
}
